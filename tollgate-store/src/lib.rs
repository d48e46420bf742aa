//! Storage for tollgate: the [`Store`] trait plus its `dashmap`-backed
//! in-memory implementation and `heed`-backed on-disk implementation.

pub mod lmdb;
pub mod memory;
pub mod pagination;
mod trait_def;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;
pub use trait_def::Store;
