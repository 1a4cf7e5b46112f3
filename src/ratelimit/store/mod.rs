//! Bounded, expiring counter storage.
//!
//! Records are keyed by the composite request key and carry their own window
//! end. A record whose `reset_time` has passed is treated as absent whether
//! or not it has been physically removed yet.

mod expiring;
mod lru;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::Clock;

pub use expiring::ExpiringStore;
pub use lru::LruStore;

/// Default upper bound on stored records.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A counting cell for one key inside one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests seen in the current window (at least 1)
    pub count: u64,
    /// Epoch ms at which the window ends
    pub reset_time: i64,
    /// Epoch ms at which the window started
    pub first_request: i64,
}

impl RateLimitRecord {
    /// Open a new window at `now` with a single request counted.
    pub fn start(now: i64, window_ms: u64) -> Self {
        let window = i64::try_from(window_ms).unwrap_or(i64::MAX);
        Self {
            count: 1,
            reset_time: now.saturating_add(window),
            first_request: now,
        }
    }

    /// Whether the window is still open at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        now < self.reset_time
    }

    /// Count one more request, or replace the record with a fresh window if
    /// the current one has elapsed.
    pub(crate) fn register_hit(&mut self, now: i64, window_ms: u64) {
        if self.is_live(now) {
            self.count += 1;
        } else {
            *self = Self::start(now, window_ms);
        }
    }
}

/// Storage for rate limit records.
///
/// Implementations are interchangeable and must serialize the
/// read-increment-write in [`increment`](RateLimitStore::increment) per key.
pub trait RateLimitStore: Send + Sync {
    /// The live record for `key`, lazily dropping it if it has expired.
    fn get(&self, key: &str) -> Option<RateLimitRecord>;

    /// Insert or replace the record for `key`, evicting if the store is full.
    fn set(&self, key: &str, record: RateLimitRecord);

    /// Count a request against `key`, opening a new window of `window_ms`
    /// when there is no live record. Returns the resulting record.
    fn increment(&self, key: &str, window_ms: u64) -> RateLimitRecord;

    /// Remove `key` unconditionally.
    fn reset(&self, key: &str);

    /// Remove every record whose `reset_time` is in the past. Returns the
    /// number of records removed.
    fn cleanup(&self) -> usize;

    /// Number of physically stored records, expired ones included.
    fn size(&self) -> usize;

    /// Remove every record.
    fn clear(&self);
}

/// Store variant selected at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Evicts the oldest-inserted record when full
    #[default]
    Expiring,
    /// Evicts the least recently accessed record when full
    Lru,
}

/// Build a store of the given kind.
pub fn create_store(
    kind: StoreKind,
    max_entries: usize,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RateLimitStore> {
    info!(kind = ?kind, max_entries = max_entries, "Creating rate limit store");

    match kind {
        StoreKind::Expiring => Arc::new(ExpiringStore::new(max_entries, clock)),
        StoreKind::Lru => Arc::new(LruStore::new(max_entries, clock)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn stores(max_entries: usize) -> Vec<(Arc<ManualClock>, Arc<dyn RateLimitStore>)> {
        [StoreKind::Expiring, StoreKind::Lru]
            .into_iter()
            .map(|kind| {
                let clock = Arc::new(ManualClock::new(0));
                let store = create_store(kind, max_entries, clock.clone());
                (clock, store)
            })
            .collect()
    }

    #[test]
    fn test_record_start() {
        let record = RateLimitRecord::start(1_000, 500);
        assert_eq!(record.count, 1);
        assert_eq!(record.first_request, 1_000);
        assert_eq!(record.reset_time, 1_500);
        assert!(record.is_live(1_499));
        assert!(!record.is_live(1_500));
    }

    #[test]
    fn test_increment_counts_within_window() {
        for (clock, store) in stores(100) {
            assert_eq!(store.increment("k", 1_000).count, 1);
            clock.advance(100);
            let record = store.increment("k", 1_000);
            assert_eq!(record.count, 2);
            assert_eq!(record.first_request, 0);
            assert_eq!(record.reset_time, 1_000);
        }
    }

    #[test]
    fn test_increment_replaces_expired_record() {
        for (clock, store) in stores(100) {
            store.increment("k", 1_000);
            store.increment("k", 1_000);
            clock.set(1_000);

            let record = store.increment("k", 1_000);
            assert_eq!(record.count, 1);
            assert_eq!(record.first_request, 1_000);
            assert_eq!(record.reset_time, 2_000);
        }
    }

    #[test]
    fn test_get_treats_expired_as_absent() {
        for (clock, store) in stores(100) {
            store.increment("k", 1_000);
            assert_eq!(store.get("k").map(|r| r.count), Some(1));

            clock.set(1_000);
            assert_eq!(store.get("k"), None);
            assert_eq!(store.size(), 0);
        }
    }

    #[test]
    fn test_reset_and_clear() {
        for (_clock, store) in stores(100) {
            store.increment("a", 1_000);
            store.increment("b", 1_000);

            store.reset("a");
            assert_eq!(store.get("a"), None);
            assert_eq!(store.size(), 1);

            store.reset("missing");
            store.clear();
            assert_eq!(store.size(), 0);
        }
    }

    #[test]
    fn test_cleanup_removes_only_past_records() {
        for (clock, store) in stores(100) {
            assert_eq!(store.cleanup(), 0);

            store.increment("short", 100);
            store.increment("boundary", 200);
            store.increment("long", 10_000);
            clock.set(200);

            // "boundary" has reset_time == now and is kept by the sweep
            assert_eq!(store.cleanup(), 1);
            assert_eq!(store.size(), 2);
            assert_eq!(store.get("long").map(|r| r.count), Some(1));

            assert_eq!(store.cleanup(), 0);
        }
    }

    #[test]
    fn test_capacity_bound() {
        for (_clock, store) in stores(5) {
            for i in 0..6 {
                store.increment(&format!("key-{}", i), 60_000);
            }
            assert!(store.size() <= 5);
            assert!(store.get("key-5").is_some());
        }
    }

    #[test]
    fn test_capacity_prefers_expired_records() {
        for (clock, store) in stores(2) {
            store.increment("stale", 100);
            store.increment("live", 10_000);
            clock.set(500);

            store.increment("new", 10_000);
            assert_eq!(store.size(), 2);
            assert!(store.get("live").is_some());
            assert!(store.get("new").is_some());
        }
    }

    #[test]
    fn test_set_overwrites_existing() {
        for (_clock, store) in stores(100) {
            store.increment("k", 1_000);
            store.set(
                "k",
                RateLimitRecord {
                    count: 7,
                    reset_time: 5_000,
                    first_request: 0,
                },
            );
            assert_eq!(store.get("k").map(|r| r.count), Some(7));
            assert_eq!(store.increment("k", 1_000).count, 8);
        }
    }
}
