//! A strategy that keeps lock records in the same map as cached values.
//!
//! This is the layout the read-write strategy replaced. Soft locks and
//! timestamped items share one table, so `evict_all` clearing the table also
//! forgets every in-flight write. A loader that read a row before such a
//! write can then cache it after the write commits, and the stale value stays
//! until the next write or eviction of that key.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use rw_cache::{LocalTimestamper, Timestamp, TimestampSource};

#[derive(Debug, Clone, Copy)]
enum Slot {
    Item {
        value: u64,
        timestamp: Timestamp,
    },
    Lock {
        writers: usize,
        concurrent: bool,
        unlocked_at: Timestamp,
    },
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<u64, Slot>,
    puts_stored: u64,
    puts_skipped: u64,
    updates_written: u64,
    updates_evicted: u64,
    orphaned_updates: u64,
    wiped_locks: u64,
    evict_alls: u64,
}

/// Single-map cache strategy with no region invalidation marker.
#[derive(Debug, Default)]
pub struct NaiveStrategy {
    state: Mutex<State>,
    clock: LocalTimestamper,
}

impl NaiveStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_timestamp(&self) -> Timestamp {
        self.clock.next()
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        match self.state.lock().slots.get(&key) {
            Some(Slot::Item { value, .. }) => Some(*value),
            _ => None,
        }
    }

    /// Returns whether the loaded value was cached.
    pub fn put_from_load(&self, key: u64, value: u64, load_timestamp: Timestamp) -> bool {
        let mut state = self.state.lock();
        let writeable = match state.slots.get(&key) {
            None => true,
            Some(Slot::Item { timestamp, .. }) => *timestamp < load_timestamp,
            Some(Slot::Lock {
                writers,
                unlocked_at,
                ..
            }) => *writers == 0 && *unlocked_at < load_timestamp,
        };
        if writeable {
            state.slots.insert(
                key,
                Slot::Item {
                    value,
                    timestamp: load_timestamp,
                },
            );
            state.puts_stored += 1;
        } else {
            state.puts_skipped += 1;
        }
        writeable
    }

    pub fn lock(&self, key: u64) {
        let mut state = self.state.lock();
        let slot = match state.slots.get(&key) {
            Some(Slot::Lock {
                writers,
                unlocked_at,
                ..
            }) => Slot::Lock {
                writers: writers + 1,
                concurrent: *writers > 0,
                unlocked_at: *unlocked_at,
            },
            _ => Slot::Lock {
                writers: 1,
                concurrent: false,
                unlocked_at: Timestamp::ZERO,
            },
        };
        state.slots.insert(key, slot);
    }

    /// Publishes `value` if this writer was the only one, then unlocks.
    pub fn after_update(&self, key: u64, value: u64, tx_timestamp: Timestamp) {
        let now = self.clock.next();
        let mut state = self.state.lock();
        match state.slots.get(&key).copied() {
            Some(Slot::Lock {
                writers: 1,
                concurrent: false,
                ..
            }) => {
                state.slots.insert(
                    key,
                    Slot::Item {
                        value,
                        timestamp: tx_timestamp,
                    },
                );
                state.updates_written += 1;
            }
            Some(Slot::Lock {
                writers,
                concurrent,
                ..
            }) => {
                let writers = writers.saturating_sub(1);
                state.slots.insert(
                    key,
                    Slot::Lock {
                        writers,
                        concurrent: concurrent && writers > 0,
                        unlocked_at: now,
                    },
                );
                state.updates_evicted += 1;
            }
            // The lock record is gone, so whatever a loader put here stays.
            _ => state.orphaned_updates += 1,
        }
    }

    /// Clears the whole table, lock records included.
    pub fn evict_all(&self) {
        let mut state = self.state.lock();
        let wiped = state
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Lock { writers, .. } if *writers > 0))
            .count() as u64;
        state.slots.clear();
        state.wiped_locks += wiped;
        state.evict_alls += 1;
    }

    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let mut metrics = BTreeMap::new();
        metrics.insert("puts_stored".to_string(), state.puts_stored as f64);
        metrics.insert("puts_skipped".to_string(), state.puts_skipped as f64);
        metrics.insert("updates_written".to_string(), state.updates_written as f64);
        metrics.insert("updates_evicted".to_string(), state.updates_evicted as f64);
        metrics.insert("orphaned_updates".to_string(), state.orphaned_updates as f64);
        metrics.insert("wiped_locks".to_string(), state.wiped_locks as f64);
        metrics.insert("evict_alls".to_string(), state.evict_alls as f64);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rejected_while_locked() {
        let cache = NaiveStrategy::new();
        let load_ts = cache.next_timestamp();
        cache.lock(1);
        assert!(!cache.put_from_load(1, 10, load_ts));
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn test_update_publishes_value() {
        let cache = NaiveStrategy::new();
        let tx = cache.next_timestamp();
        cache.lock(1);
        cache.after_update(1, 20, tx);
        assert_eq!(cache.get(1), Some(20));
    }

    #[test]
    fn test_concurrent_writers_leave_key_uncached() {
        let cache = NaiveStrategy::new();
        let tx1 = cache.next_timestamp();
        let tx2 = cache.next_timestamp();
        cache.lock(1);
        cache.lock(1);
        cache.after_update(1, 1, tx1);
        cache.after_update(1, 2, tx2);
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn test_evict_all_wipes_locks_and_admits_stale_load() {
        let cache = NaiveStrategy::new();

        // Loader reads version 1 before the write starts.
        let load_ts = cache.next_timestamp();
        let stale_row = 1;

        let tx = cache.next_timestamp();
        cache.lock(1);
        cache.evict_all();

        assert!(cache.put_from_load(1, stale_row, load_ts));
        cache.after_update(1, 2, tx);

        assert_eq!(cache.get(1), Some(stale_row));
        let metrics = cache.metrics();
        assert_eq!(metrics["wiped_locks"], 1.0);
        assert_eq!(metrics["orphaned_updates"], 1.0);
    }
}
