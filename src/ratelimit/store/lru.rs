//! Expiring store with least-recently-used eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{RateLimitRecord, RateLimitStore};
use crate::ratelimit::clock::Clock;

struct LruSlot {
    record: RateLimitRecord,
    last_access: u64,
}

#[derive(Default)]
struct LruInner {
    entries: HashMap<String, LruSlot>,
    /// Monotonic access counter, bumped on every get/set
    tick: u64,
}

impl LruInner {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn cleanup(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.record.reset_time >= now);
        before - self.entries.len()
    }

    fn evict_least_recent(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            debug!(key = %key, "Evicted least recently used rate limit record");
        }
    }

    fn set(&mut self, key: &str, record: RateLimitRecord, max_entries: usize, now: i64) {
        let last_access = self.touch();

        if let Some(slot) = self.entries.get_mut(key) {
            slot.record = record;
            slot.last_access = last_access;
            return;
        }

        if self.entries.len() >= max_entries {
            self.cleanup(now);
            if self.entries.len() >= max_entries {
                self.evict_least_recent();
            }
        }

        self.entries
            .insert(key.to_string(), LruSlot { record, last_access });
    }
}

/// A store that expires records lazily and, when full, evicts the record
/// accessed least recently.
///
/// All operations run under a single mutex, which serializes increments.
pub struct LruStore {
    inner: Mutex<LruInner>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl LruStore {
    /// Create a store holding at most `max_entries` records.
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LruInner::default()),
            max_entries: max_entries.max(1),
            clock,
        }
    }
}

impl RateLimitStore for LruStore {
    fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let last_access = inner.touch();

        let record = {
            let slot = inner.entries.get_mut(key)?;
            slot.last_access = last_access;
            slot.record
        };

        if record.is_live(now) {
            Some(record)
        } else {
            inner.entries.remove(key);
            None
        }
    }

    fn set(&self, key: &str, record: RateLimitRecord) {
        let now = self.clock.now_ms();
        self.inner.lock().set(key, record, self.max_entries, now);
    }

    fn increment(&self, key: &str, window_ms: u64) -> RateLimitRecord {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let record = match inner.entries.get(key) {
            Some(slot) => {
                let mut record = slot.record;
                record.register_hit(now, window_ms);
                record
            }
            None => RateLimitRecord::start(now, window_ms),
        };

        inner.set(key, record, self.max_entries, now);
        record
    }

    fn reset(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let removed = inner.cleanup(now);

        if removed > 0 {
            debug!(removed = removed, remaining = inner.entries.len(), "Cleaned up expired records");
        }
        removed
    }

    fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}
