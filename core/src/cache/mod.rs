//! Result cache keyed by command fingerprint.

mod entry;
mod store;

pub use entry::{CacheEntry, CacheSnapshot, CacheSnapshotEntry};
pub use store::{CachePut, CacheStats, ResultCache};
