//! Read-Write Region Counters
//!
//! Counters for one region of the read-write strategy. Skipped puts are counted
//! per [`SkipReason`], which is what tells an operator *why* the cache is not
//! being populated (hot keys under constant update show up as `locked`, loads
//! slower than the write rate as `unlocked_after_load`).

use crate::strategy::SkipReason;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one region.
#[derive(Debug, Default)]
pub struct RegionMetrics {
    gets: AtomicU64,
    hits: AtomicU64,
    puts_stored: AtomicU64,
    skipped_locked: AtomicU64,
    skipped_invalidated: AtomicU64,
    skipped_unlocked_after_load: AtomicU64,
    skipped_minimal_put: AtomicU64,
    skipped_newer_entry: AtomicU64,
    locks: AtomicU64,
    releases: AtomicU64,
    updates_written: AtomicU64,
    updates_evicted: AtomicU64,
    invalid_tokens: AtomicU64,
    evictions: AtomicU64,
    evict_alls: AtomicU64,
    purged_records: AtomicU64,
    abandoned_locks: AtomicU64,
}

/// Point-in-time copy of [`RegionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionMetricsSnapshot {
    /// Calls to `get`.
    pub gets: u64,
    /// `get` calls that returned a value.
    pub hits: u64,
    /// `put_from_load` calls that stored.
    pub puts_stored: u64,
    /// Skips because the key was locked.
    pub skipped_locked: u64,
    /// Skips because of the region invalidation marker.
    pub skipped_invalidated: u64,
    /// Skips because the key was unlocked after the load started.
    pub skipped_unlocked_after_load: u64,
    /// Skips because a valid entry already existed under minimal puts.
    pub skipped_minimal_put: u64,
    /// Skips because a newer entry was already cached.
    pub skipped_newer_entry: u64,
    /// Holds taken.
    pub locks: u64,
    /// Holds given up, through `release` or `after_update`.
    pub releases: u64,
    /// `after_update` calls that wrote the committed value.
    pub updates_written: u64,
    /// `after_update` calls that evicted instead of writing.
    pub updates_evicted: u64,
    /// Calls rejected with an invalid lock token.
    pub invalid_tokens: u64,
    /// Calls to `evict`.
    pub evictions: u64,
    /// Calls to `evict_all`.
    pub evict_alls: u64,
    /// Lock records dropped by purge.
    pub purged_records: u64,
    /// Held locks force-released by purge.
    pub abandoned_locks: u64,
}

impl RegionMetricsSnapshot {
    /// Total skipped puts across all reasons.
    pub fn puts_skipped(&self) -> u64 {
        self.skipped_locked
            + self.skipped_invalidated
            + self.skipped_unlocked_after_load
            + self.skipped_minimal_put
            + self.skipped_newer_entry
    }

    /// `gets` that found nothing usable.
    pub fn misses(&self) -> u64 {
        self.gets - self.hits
    }

    /// Hit rate between 0.0 and 1.0, or 0.0 before the first `get`.
    pub fn hit_rate(&self) -> f64 {
        if self.gets > 0 {
            self.hits as f64 / self.gets as f64
        } else {
            0.0
        }
    }

    /// Converts the snapshot to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("gets".to_string(), self.gets as f64);
        metrics.insert("cache_hits".to_string(), self.hits as f64);
        metrics.insert("cache_misses".to_string(), self.misses() as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());

        metrics.insert("puts_stored".to_string(), self.puts_stored as f64);
        metrics.insert("puts_skipped".to_string(), self.puts_skipped() as f64);
        metrics.insert("puts_skipped_locked".to_string(), self.skipped_locked as f64);
        metrics.insert(
            "puts_skipped_invalidated".to_string(),
            self.skipped_invalidated as f64,
        );
        metrics.insert(
            "puts_skipped_unlocked_after_load".to_string(),
            self.skipped_unlocked_after_load as f64,
        );
        metrics.insert(
            "puts_skipped_minimal_put".to_string(),
            self.skipped_minimal_put as f64,
        );
        metrics.insert(
            "puts_skipped_newer_entry".to_string(),
            self.skipped_newer_entry as f64,
        );

        metrics.insert("locks".to_string(), self.locks as f64);
        metrics.insert("releases".to_string(), self.releases as f64);
        metrics.insert("updates_written".to_string(), self.updates_written as f64);
        metrics.insert("updates_evicted".to_string(), self.updates_evicted as f64);
        metrics.insert("invalid_tokens".to_string(), self.invalid_tokens as f64);

        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("evict_alls".to_string(), self.evict_alls as f64);
        metrics.insert("purged_lock_records".to_string(), self.purged_records as f64);
        metrics.insert("abandoned_locks".to_string(), self.abandoned_locks as f64);

        metrics
    }
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RegionMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_get(&self, hit: bool) {
        bump(&self.gets);
        if hit {
            bump(&self.hits);
        }
    }

    pub(crate) fn record_put_stored(&self) {
        bump(&self.puts_stored);
    }

    pub(crate) fn record_put_skipped(&self, reason: SkipReason) {
        bump(match reason {
            SkipReason::Locked => &self.skipped_locked,
            SkipReason::Invalidated => &self.skipped_invalidated,
            SkipReason::UnlockedAfterLoad => &self.skipped_unlocked_after_load,
            SkipReason::MinimalPut => &self.skipped_minimal_put,
            SkipReason::NewerEntry => &self.skipped_newer_entry,
        });
    }

    pub(crate) fn record_lock(&self) {
        bump(&self.locks);
    }

    pub(crate) fn record_release(&self) {
        bump(&self.releases);
    }

    pub(crate) fn record_update(&self, written: bool) {
        bump(if written {
            &self.updates_written
        } else {
            &self.updates_evicted
        });
    }

    pub(crate) fn record_invalid_token(&self) {
        bump(&self.invalid_tokens);
    }

    pub(crate) fn record_eviction(&self) {
        bump(&self.evictions);
    }

    pub(crate) fn record_evict_all(&self) {
        bump(&self.evict_alls);
    }

    pub(crate) fn record_purge(&self, removed: usize, abandoned: usize) {
        self.purged_records
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.abandoned_locks
            .fetch_add(abandoned as u64, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> RegionMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RegionMetricsSnapshot {
            gets: load(&self.gets),
            hits: load(&self.hits),
            puts_stored: load(&self.puts_stored),
            skipped_locked: load(&self.skipped_locked),
            skipped_invalidated: load(&self.skipped_invalidated),
            skipped_unlocked_after_load: load(&self.skipped_unlocked_after_load),
            skipped_minimal_put: load(&self.skipped_minimal_put),
            skipped_newer_entry: load(&self.skipped_newer_entry),
            locks: load(&self.locks),
            releases: load(&self.releases),
            updates_written: load(&self.updates_written),
            updates_evicted: load(&self.updates_evicted),
            invalid_tokens: load(&self.invalid_tokens),
            evictions: load(&self.evictions),
            evict_alls: load(&self.evict_alls),
            purged_records: load(&self.purged_records),
            abandoned_locks: load(&self.abandoned_locks),
        }
    }

    /// Converts the current counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        self.snapshot().to_btreemap()
    }
}
