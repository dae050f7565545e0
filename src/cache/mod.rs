//! Cache Module
//!
//! In-memory response caching with TTL expiry and in-flight request
//! de-duplication.

mod entry;
mod key;
mod lru;
mod manager;
mod stats;
pub mod ttl;


// Re-export public types
pub use entry::{CacheEntry, EntryStatus};
pub use key::{CacheKey, HttpMethod};
pub use lru::LruTracker;
pub use manager::{CacheManager, FetchOutcome};
pub use stats::CacheStats;
pub use ttl::TtlPreset;
