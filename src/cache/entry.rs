//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

// == Entry Status ==
/// Descriptive lifecycle state of a key.
///
/// Only TTL validity is enforced on reads; the status is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Fresh,
    Stale,
    Loading,
}

// == Cache Entry ==
/// A cached payload with the metadata needed to judge its validity.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached payload
    pub data: V,
    /// Monotonic insertion time
    pub timestamp: Instant,
    /// How long the entry stays valid after `timestamp`
    pub ttl: Duration,
    /// Status recorded at insertion
    pub status: EntryStatus,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a fresh entry stamped with the current time.
    pub fn new(data: V, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            ttl,
            status: EntryStatus::Fresh,
        }
    }

    // == Is Valid ==
    /// An entry is valid while `now - timestamp < ttl`.
    ///
    /// A zero TTL is never valid. Once the full TTL has elapsed the entry is
    /// immediately invalid.
    pub fn is_valid(&self) -> bool {
        self.timestamp.elapsed() < self.ttl
    }

    /// Current status: the recorded one while valid, `Stale` once expired.
    pub fn current_status(&self) -> EntryStatus {
        if self.is_valid() {
            self.status
        } else {
            EntryStatus::Stale
        }
    }

    // == Time To Live ==
    /// Remaining validity, `Duration::ZERO` once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.timestamp.elapsed())
    }
}
