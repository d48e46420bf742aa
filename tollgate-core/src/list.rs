//! Pagination: the shared `{page, limit}` request shape and the
//! `{page, limit, last_page}` response metadata attached to every listing.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Metadata returned alongside any paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadata {
    pub page: i64,
    pub limit: i64,
    pub last_page: i64,
}

impl ListMetadata {
    /// `last_page = ceil(total / limit)`, with the special case that a
    /// zero total still reports `last_page = 1`.
    pub fn new(payload: &ListPayload, total: i64) -> Self {
        let last_page = if total == 0 {
            1
        } else {
            (total + payload.limit - 1) / payload.limit
        };
        ListMetadata { page: payload.page, limit: payload.limit, last_page }
    }
}

/// The request-side pagination payload. `Default`s are `{page: 1, limit:
/// 10}`, applied by [`ListPayload::normalize`] before validation, not by
/// `serde(default)`, so a caller who explicitly sends `0` still gets the
/// same default as one who omits the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ListPayload {
    #[validate(range(min = 1))]
    pub page: i64,
    #[validate(range(min = 1, max = 100))]
    pub limit: i64,
}

impl Default for ListPayload {
    fn default() -> Self {
        ListPayload { page: 1, limit: 10 }
    }
}

impl ListPayload {
    /// Apply the `{page: 1, limit: 10}` defaults to any zero field, then
    /// return `self` for chaining into `.validate()`.
    pub fn normalize(mut self) -> Self {
        if self.limit == 0 {
            self.limit = 10;
        }
        if self.page == 0 {
            self.page = 1;
        }
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_reports_last_page_one() {
        let payload = ListPayload { page: 1, limit: 10 };
        assert_eq!(ListMetadata::new(&payload, 0).last_page, 1);
    }

    #[test]
    fn exact_multiple_does_not_add_extra_page() {
        let payload = ListPayload { page: 1, limit: 10 };
        assert_eq!(ListMetadata::new(&payload, 20).last_page, 2);
    }

    #[test]
    fn remainder_adds_one_page() {
        let payload = ListPayload { page: 1, limit: 10 };
        assert_eq!(ListMetadata::new(&payload, 21).last_page, 3);
    }

    #[test]
    fn normalize_fills_in_zero_fields() {
        let normalized = ListPayload { page: 0, limit: 0 }.normalize();
        assert_eq!(normalized, ListPayload { page: 1, limit: 10 });
    }

    #[test]
    fn offset_is_zero_indexed() {
        let payload = ListPayload { page: 3, limit: 10 };
        assert_eq!(payload.offset(), 20);
    }

    proptest::proptest! {
        /// Property 5 from the spec: last_page = max(1, ceil(total/limit)).
        #[test]
        fn prop_last_page_matches_formula(total in 0i64..100_000, limit in 1i64..=100) {
            let payload = ListPayload { page: 1, limit };
            let last_page = ListMetadata::new(&payload, total).last_page;
            let expected = std::cmp::max(1, (total + limit - 1) / limit);
            proptest::prop_assert_eq!(last_page, expected);
        }
    }
}
