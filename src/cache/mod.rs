//! Vary-aware response cache
//!
//! Finished responses are stored under their true cache key: the request
//! path in canonical parameter order plus a `#` suffix carrying whatever
//! the strategy negotiated beyond the path (output format, quality, device
//! width, DPR). Two requests for the same path from differently capable
//! clients therefore occupy different entries and never cross-serve.
//!
//! The store is a fixed-capacity FIFO ([`BoundedCache`]); [`snapshot`]
//! persists it across restarts as JSON Lines.

pub mod entry;
pub mod snapshot;
pub mod store;

pub use entry::CacheEntry;
pub use snapshot::SnapshotError;
pub use store::BoundedCache;
