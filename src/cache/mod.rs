//! Cache Module
//!
//! Provides the generic bounded cache: an access-ordered table with
//! combined LRU, TTL and size eviction under two-level locking.

mod bounded;
mod entry;
mod lru;
mod stats;


// Re-export public types
pub use bounded::{BoundedCache, EvictListener};
pub use stats::StatsSnapshot;

pub(crate) use entry::current_timestamp_ms;
