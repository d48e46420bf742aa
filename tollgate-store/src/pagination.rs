//! Slice-level pagination shared by every backend: both `MemoryStore` and
//! `LmdbStore` materialize a sorted `Vec` of the filtered rows and hand it
//! here rather than duplicating the offset/limit arithmetic.

use tollgate_core::{ListMetadata, ListPayload};

/// Apply `payload`'s page/limit over an already-sorted `items`, returning
/// the page slice plus the metadata `{page, limit, last_page}` computed
/// against `items.len()` as the total.
pub fn paginate<T: Clone>(items: &[T], payload: &ListPayload) -> (ListMetadata, Vec<T>) {
    let total = items.len() as i64;
    let metadata = ListMetadata::new(payload, total);
    let offset = payload.offset().max(0) as usize;
    let page = if offset >= items.len() {
        Vec::new()
    } else {
        let end = (offset + payload.limit as usize).min(items.len());
        items[offset..end].to_vec()
    };
    (metadata, page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_past_the_end_is_empty_but_metadata_is_still_correct() {
        let items: Vec<i32> = (0..5).collect();
        let payload = ListPayload { page: 3, limit: 10 };
        let (meta, page) = paginate(&items, &payload);
        assert!(page.is_empty());
        assert_eq!(meta.last_page, 1);
    }

    #[test]
    fn middle_page_slices_correctly() {
        let items: Vec<i32> = (0..25).collect();
        let payload = ListPayload { page: 2, limit: 10 };
        let (meta, page) = paginate(&items, &payload);
        assert_eq!(page, (10..20).collect::<Vec<_>>());
        assert_eq!(meta.last_page, 3);
    }
}
