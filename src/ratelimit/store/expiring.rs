//! Expiring store with insertion-order eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{RateLimitRecord, RateLimitStore};
use crate::ratelimit::clock::Clock;

struct Slot {
    record: RateLimitRecord,
    /// Insertion sequence number; the smallest is evicted first
    inserted: u64,
}

/// A concurrent store that expires records lazily and, when full, evicts the
/// oldest-inserted key.
///
/// Per-key updates go through `DashMap`'s shard locks, so concurrent
/// increments of the same key never lose an update.
///
/// `max_entries` is a soft cap: room is made before the insert without a
/// store-wide lock, so concurrent inserts of new keys can overshoot it by up
/// to the number of racing writers. The next insert that finds the store
/// full evicts back down. Use [`LruStore`](super::LruStore) for a hard cap.
pub struct ExpiringStore {
    entries: DashMap<String, Slot>,
    max_entries: usize,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ExpiringStore {
    /// Create a store holding at most `max_entries` records.
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            sequence: AtomicU64::new(0),
            clock,
        }
    }

    /// Free a slot for a key that is about to be inserted.
    fn make_room(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        self.cleanup();

        while self.entries.len() >= self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|slot| slot.inserted)
            .map(|slot| slot.key().clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                debug!(key = %key, "Evicted oldest rate limit record");
                true
            }
            None => false,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl RateLimitStore for ExpiringStore {
    fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let now = self.clock.now_ms();
        let record = self.entries.get(key).map(|slot| slot.record)?;

        if record.is_live(now) {
            return Some(record);
        }

        self.entries.remove_if(key, |_, slot| !slot.record.is_live(now));
        None
    }

    fn set(&self, key: &str, record: RateLimitRecord) {
        if let Some(mut slot) = self.entries.get_mut(key) {
            slot.record = record;
            return;
        }

        self.make_room();
        let inserted = self.next_sequence();
        self.entries
            .entry(key.to_string())
            .and_modify(|slot| slot.record = record)
            .or_insert(Slot { record, inserted });
    }

    fn increment(&self, key: &str, window_ms: u64) -> RateLimitRecord {
        let now = self.clock.now_ms();

        if let Some(mut slot) = self.entries.get_mut(key) {
            slot.record.register_hit(now, window_ms);
            return slot.record;
        }

        self.make_room();
        let inserted = self.next_sequence();
        let slot = self
            .entries
            .entry(key.to_string())
            .and_modify(|slot| slot.record.register_hit(now, window_ms))
            .or_insert(Slot {
                record: RateLimitRecord::start(now, window_ms),
                inserted,
            });
        slot.record
    }

    fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.entries.retain(|_, slot| {
            let keep = slot.record.reset_time >= now;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Cleaned up expired records");
        }
        removed
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
