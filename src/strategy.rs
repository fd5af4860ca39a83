//! Read-Write Concurrency Strategy
//!
//! The consistency layer between an ORM transaction lifecycle and a distributed
//! cache region. Reads never lock. Every write goes through
//! lock → authoritative commit → [`after_update`](ReadWriteStrategy::after_update)
//! (or [`release`](ReadWriteStrategy::release) on rollback), and a load may only
//! populate the cache if nothing on its key was written since the load started.
//!
//! # Protocol
//!
//! ```text
//!  writer tx                       loader                          cache
//!  ─────────                       ──────                          ─────
//!  tx_ts = next()
//!  lock(k) ─────────────────────────────────────────────────▶ Locked(1)
//!                                  load_ts = next()
//!                                  read authoritative store
//!                                  (sees old row)
//!  commit authoritative store
//!  after_update(k, new) ─────────────────────────────────▶ (new, tx_ts)
//!                                                          Unlocked(unlock_ts)
//!                                  put_from_load(k, old, load_ts)
//!                                    load_ts <= unlock_ts ─▶ Skipped
//! ```
//!
//! `put_from_load` stores `(value, load_ts)` only if, checked atomically with the
//! store inside [`LockStore::with_record`] for the key:
//!
//! 1. the key's soft lock has no holders,
//! 2. the key was not released at or after `load_ts`,
//! 3. `load_ts` is strictly after the region invalidation marker,
//! 4. under minimal puts, no valid entry exists,
//! 5. no valid entry already carries a timestamp `>= load_ts`.
//!
//! A failed check is a [`PutOutcome::Skipped`], never an error.
//!
//! # Region-Wide Invalidation
//!
//! [`evict_all`](ReadWriteStrategy::evict_all) raises the region marker and
//! leaves the soft-lock records alone. Lock records are exactly what rejects the
//! late `put_from_load` of a load that raced with a write; clearing them together
//! with the entries would let that load repopulate the cache with the value the
//! write just replaced.
//!
//! # Several Nodes
//!
//! Each node runs its own strategy instance over the same [`DistributedMap`],
//! [`InvalidationStore`] and [`LockStore`]. A node with a private lock store
//! cannot see another node's writes and would cache the value they replaced.

use crate::config::RegionConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::lock::{LockRecord, LockToken, ReleaseOutcome, SoftLockTable};
use crate::marker::RegionInvalidationMarker;
use crate::metrics::{CacheMetrics, RegionMetrics, RegionMetricsSnapshot};
use crate::region::CacheRegion;
use crate::store::{
    DistributedMap, InvalidationStore, LocalInvalidationStore, LocalMap, LockStore, StoreError,
};
use crate::timestamp::{LocalTimestamper, Timestamp, TimestampSource};
use core::fmt;
use core::hash::Hash;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Why a `put_from_load` did not store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The key's soft lock has at least one holder.
    Locked,
    /// The load timestamp is not after the region invalidation marker.
    Invalidated,
    /// The key's soft lock was released at or after the load timestamp.
    UnlockedAfterLoad,
    /// Minimal puts are on and a valid entry already exists.
    MinimalPut,
    /// A valid entry with a timestamp at or after the load timestamp exists.
    NewerEntry,
}

impl SkipReason {
    /// Stable lowercase name, used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Locked => "locked",
            SkipReason::Invalidated => "invalidated",
            SkipReason::UnlockedAfterLoad => "unlocked_after_load",
            SkipReason::MinimalPut => "minimal_put",
            SkipReason::NewerEntry => "newer_entry",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ReadWriteStrategy::put_from_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The loaded value is now cached.
    Stored,
    /// The value was discarded.
    Skipped(SkipReason),
}

impl PutOutcome {
    /// Returns `true` if the value was cached.
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored)
    }

    /// The skip reason, if the value was discarded.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            PutOutcome::Stored => None,
            PutOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

#[cfg(any(test, feature = "test-hooks"))]
type PutHook<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Read-write concurrency strategy for one cache region.
///
/// All operations take `&self`; share the strategy between threads with an
/// `Arc`. Operations on one key are serialized by the lock store.
///
/// # Example
///
/// ```
/// use rw_cache::{PutOutcome, ReadWriteStrategy, RegionConfig, SkipReason};
///
/// let cache: ReadWriteStrategy<u64, String> =
///     ReadWriteStrategy::local(RegionConfig::named("accounts")).unwrap();
///
/// // A loader captures its timestamp before reading the authoritative store.
/// let load_ts = cache.next_timestamp();
///
/// // Meanwhile a writer locks, commits and publishes.
/// let tx_ts = cache.next_timestamp();
/// let token = cache.lock(7, tx_ts).unwrap();
/// cache.after_update(7, "balance=20".to_string(), tx_ts, token).unwrap();
///
/// // The loader's stale read is refused.
/// let outcome = cache
///     .put_from_load(7, "balance=10".to_string(), load_ts, load_ts, false)
///     .unwrap();
/// assert_eq!(outcome, PutOutcome::Skipped(SkipReason::UnlockedAfterLoad));
/// let now = cache.next_timestamp();
/// assert_eq!(cache.get(&7, now).unwrap().as_deref(), Some("balance=20"));
/// ```
pub struct ReadWriteStrategy<
    K,
    V,
    M = LocalMap<K, CacheEntry<V>>,
    I = LocalInvalidationStore,
    L = SoftLockTable<K>,
> {
    config: RegionConfig,
    region: CacheRegion<K, V, M>,
    marker: RegionInvalidationMarker<I>,
    locks: L,
    clock: Arc<dyn TimestampSource>,
    metrics: RegionMetrics,
    #[cfg(any(test, feature = "test-hooks"))]
    put_hook: parking_lot::Mutex<Option<PutHook<K>>>,
}

impl<K, V> ReadWriteStrategy<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Creates a single-process region backed by a [`LocalMap`], a
    /// [`LocalInvalidationStore`], a [`SoftLockTable`] and a [`LocalTimestamper`].
    pub fn local(config: RegionConfig) -> Result<Self> {
        let segments = config.segments;
        Self::new(
            config,
            LocalMap::new(segments),
            LocalInvalidationStore::new(),
            SoftLockTable::new(segments),
            Arc::new(LocalTimestamper::new()),
        )
    }
}

impl<K, V, M, I, L> ReadWriteStrategy<K, V, M, I, L>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    /// Creates a region over the given substrate and clock.
    ///
    /// Every node serving the region must pass handles to the same map,
    /// invalidation store and lock store.
    ///
    /// Fails with [`CacheError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: RegionConfig,
        map: M,
        invalidation: I,
        locks: L,
        clock: Arc<dyn TimestampSource>,
    ) -> Result<Self> {
        config.validate()?;
        let name: Arc<str> = Arc::from(config.name.as_str());
        Ok(Self {
            region: CacheRegion::new(Arc::clone(&name), map),
            marker: RegionInvalidationMarker::new(name, invalidation),
            locks,
            clock,
            metrics: RegionMetrics::new(),
            config,
            #[cfg(any(test, feature = "test-hooks"))]
            put_hook: parking_lot::Mutex::new(None),
        })
    }

    /// Region name.
    pub fn region_name(&self) -> &str {
        self.region.name()
    }

    /// Region configuration.
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// The soft-lock store.
    pub fn lock_table(&self) -> &L {
        &self.locks
    }

    /// The entry store.
    pub fn region(&self) -> &CacheRegion<K, V, M> {
        &self.region
    }

    /// The region invalidation marker.
    pub fn marker(&self) -> &RegionInvalidationMarker<I> {
        &self.marker
    }

    /// Issues a fresh timestamp: a transaction timestamp at transaction begin,
    /// or a load timestamp immediately before an authoritative read.
    pub fn next_timestamp(&self) -> Timestamp {
        self.clock.next()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RegionMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Installs a callback run at the start of every `put_from_load`, before its
    /// critical section. Lets tests stall a loader at the racy point.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn set_put_hook(&self, hook: impl Fn(&K) + Send + Sync + 'static) {
        *self.put_hook.lock() = Some(Arc::new(hook));
    }

    /// Removes the `put_from_load` callback.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn clear_put_hook(&self) {
        *self.put_hook.lock() = None;
    }

    /// Returns the cached value for `key` if one exists and was written after the
    /// last region invalidation.
    ///
    /// Never consults or changes the soft-lock records: a locked key stays readable
    /// until its writer publishes. `tx_timestamp` is only recorded in logs.
    pub fn get(&self, key: &K, tx_timestamp: Timestamp) -> Result<Option<V>> {
        let marker = self.marker.current()?;
        let value = self
            .region
            .load(key)?
            .filter(|entry| entry.is_valid_after(marker))
            .map(CacheEntry::into_value);

        self.metrics.record_get(value.is_some());
        tracing::trace!(
            region = %self.region.name(),
            key = ?key,
            tx_ts = %tx_timestamp,
            hit = value.is_some(),
            "cache get"
        );
        Ok(value)
    }

    /// Caches `value` read from the authoritative store at `load_timestamp`,
    /// unless a write or invalidation on `key` may have made it stale.
    ///
    /// `minimal_put` skips the write when a valid entry already exists; the
    /// region's `minimal_puts` setting forces it on for every call.
    pub fn put_from_load(
        &self,
        key: K,
        value: V,
        load_timestamp: Timestamp,
        tx_timestamp: Timestamp,
        minimal_put: bool,
    ) -> Result<PutOutcome> {
        #[cfg(any(test, feature = "test-hooks"))]
        {
            let hook = self.put_hook.lock().clone();
            if let Some(hook) = hook {
                hook(&key);
            }
        }

        let minimal_put = minimal_put || self.config.minimal_puts;
        let outcome = self.with_lock_record(&key, |record| -> Result<PutOutcome> {
            if let Err(reason) = record.admits_load(load_timestamp) {
                return Ok(PutOutcome::Skipped(reason));
            }

            let marker = self.marker.current()?;
            if load_timestamp <= marker {
                return Ok(PutOutcome::Skipped(SkipReason::Invalidated));
            }

            if let Some(existing) = self.region.load(&key)? {
                if existing.is_valid_after(marker) {
                    if minimal_put {
                        return Ok(PutOutcome::Skipped(SkipReason::MinimalPut));
                    }
                    if existing.supersedes(load_timestamp) {
                        return Ok(PutOutcome::Skipped(SkipReason::NewerEntry));
                    }
                }
            }

            self.region
                .store(key.clone(), CacheEntry::new(value, load_timestamp))?;
            Ok(PutOutcome::Stored)
        })??;

        match outcome {
            PutOutcome::Stored => {
                self.metrics.record_put_stored();
                tracing::trace!(
                    region = %self.region.name(),
                    key = ?key,
                    load_ts = %load_timestamp,
                    tx_ts = %tx_timestamp,
                    "cached loaded value"
                );
            }
            PutOutcome::Skipped(reason) => {
                self.metrics.record_put_skipped(reason);
                tracing::debug!(
                    region = %self.region.name(),
                    key = ?key,
                    load_ts = %load_timestamp,
                    tx_ts = %tx_timestamp,
                    reason = %reason,
                    "skipped put_from_load"
                );
            }
        }
        Ok(outcome)
    }

    /// Takes a soft lock on `key` ahead of an authoritative write.
    ///
    /// Never blocks on other holders. The returned token must be handed to
    /// exactly one of [`after_update`](Self::after_update) or
    /// [`release`](Self::release).
    pub fn lock(&self, key: K, tx_timestamp: Timestamp) -> Result<LockToken> {
        let timeout = self.clock.next().saturating_add(self.config.lock_timeout);
        let token = self.with_lock_record(&key, |record| record.acquire(timeout))?;

        self.metrics.record_lock();
        tracing::trace!(
            region = %self.region.name(),
            key = ?key,
            lock_id = token.lock_id(),
            holder = token.holder(),
            tx_ts = %tx_timestamp,
            "soft lock acquired"
        );
        Ok(token)
    }

    /// Publishes the committed `value` for `key` and gives up `token`.
    ///
    /// The entry becomes `(value, tx_timestamp)` unless the key was locked by
    /// more than one writer during this hold, or the cache already holds a newer
    /// entry. In both cases the entry is evicted instead and the next load
    /// repopulates it from the authoritative store.
    ///
    /// An invalid token evicts the entry and fails with
    /// [`CacheError::InvalidLockToken`].
    pub fn after_update(
        &self,
        key: K,
        value: V,
        tx_timestamp: Timestamp,
        token: LockToken,
    ) -> Result<()> {
        let result = self.with_lock_record(&key, |record| {
            if !record.is_held_by(&token) {
                self.evict_quietly(&key, "invalid lock token");
                return Err(self.invalid_token(&token));
            }

            let concurrent = record.was_locked_concurrently();
            let written = self.publish(&key, value, tx_timestamp, concurrent);
            if written.is_err() {
                self.evict_quietly(&key, "failed publish");
            }

            let now = self.clock.next();
            let released = record.release(&token, now);
            written.map(|written| (written, released))
        });
        // Never leave a value the commit may have invalidated.
        let result = result.unwrap_or_else(|err| {
            self.evict_quietly(&key, "unreachable lock store");
            Err(err)
        });

        match result {
            Ok((written, released)) => {
                self.metrics.record_update(written);
                self.metrics.record_release();
                tracing::trace!(
                    region = %self.region.name(),
                    key = ?key,
                    tx_ts = %tx_timestamp,
                    lock_id = token.lock_id(),
                    written,
                    released = ?released,
                    "after_update"
                );
                Ok(())
            }
            Err(err) => {
                if let CacheError::InvalidLockToken { .. } = err {
                    self.metrics.record_invalid_token();
                    tracing::warn!(
                        region = %self.region.name(),
                        key = ?key,
                        lock_id = token.lock_id(),
                        holder = token.holder(),
                        "after_update with a token that does not hold the lock"
                    );
                }
                Err(err)
            }
        }
    }

    fn publish(
        &self,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        concurrent: bool,
    ) -> Result<bool> {
        let newer_cached = self
            .region
            .load(key)?
            .is_some_and(|existing| existing.timestamp > tx_timestamp);
        if concurrent || newer_cached {
            self.region.remove(key)?;
            return Ok(false);
        }
        self.region
            .store(key.clone(), CacheEntry::new(value, tx_timestamp))?;
        Ok(true)
    }

    /// Gives up `token`'s hold on `key` without writing, e.g. after a rollback.
    ///
    /// When the last holder leaves, the release instant is recorded so loads
    /// that started earlier are still rejected.
    pub fn release(&self, key: &K, token: LockToken) -> Result<()> {
        let outcome = self.with_lock_record(key, |record| {
            let now = self.clock.next();
            record.release(&token, now)
        })?;

        if outcome == ReleaseOutcome::NotHeld {
            self.metrics.record_invalid_token();
            tracing::warn!(
                region = %self.region.name(),
                key = ?key,
                lock_id = token.lock_id(),
                holder = token.holder(),
                "release with a token that does not hold the lock"
            );
            return Err(self.invalid_token(&token));
        }

        self.metrics.record_release();
        tracing::trace!(
            region = %self.region.name(),
            key = ?key,
            lock_id = token.lock_id(),
            outcome = ?outcome,
            "soft lock released"
        );
        Ok(())
    }

    /// Removes the entry for `key`. Lock records are untouched.
    pub fn evict(&self, key: &K) -> Result<()> {
        let removed = self.region.remove(key)?;
        self.metrics.record_eviction();
        tracing::trace!(region = %self.region.name(), key = ?key, removed, "evicted");
        Ok(())
    }

    /// Invalidates every entry in the region by raising the marker to now.
    ///
    /// Returns the resulting marker. Lock records are untouched. With
    /// `clear_on_evict_all` the entry map is also cleared, after the marker is
    /// raised.
    pub fn evict_all(&self) -> Result<Timestamp> {
        let now = self.clock.next();
        let marker = self.marker.invalidate(now)?;
        if self.config.clear_on_evict_all {
            self.region.clear()?;
        }

        self.metrics.record_evict_all();
        tracing::debug!(
            region = %self.region.name(),
            marker = %marker,
            cleared = self.config.clear_on_evict_all,
            "region invalidated"
        );
        Ok(marker)
    }

    /// Garbage-collects the soft-lock records.
    ///
    /// Drops released records older than `unlock_grace` and force-releases holds
    /// older than `lock_timeout`. Returns the number of records dropped.
    pub fn purge_expired_locks(&self) -> Result<usize> {
        let now = self.clock.next();
        let stats = self
            .locks
            .purge(now, self.config.unlock_grace)
            .map_err(|err| self.region.unavailable(err))?;
        self.metrics.record_purge(stats.removed, stats.abandoned);
        if stats.removed > 0 || stats.abandoned > 0 {
            tracing::debug!(
                region = %self.region.name(),
                removed = stats.removed,
                abandoned = stats.abandoned,
                "purged soft-lock records"
            );
        }
        Ok(stats.removed)
    }

    fn evict_quietly(&self, key: &K, cause: &'static str) {
        if let Err(err) = self.region.remove(key) {
            tracing::warn!(
                region = %self.region.name(),
                key = ?key,
                cause,
                error = %err,
                "failed to evict entry"
            );
        }
    }

    fn with_lock_record<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockRecord<'_>) -> R,
    ) -> Result<R> {
        self.locks
            .with_record(key, f)
            .map_err(|err: StoreError| self.region.unavailable(err))
    }

    fn invalid_token(&self, token: &LockToken) -> CacheError {
        CacheError::InvalidLockToken {
            region: self.region.name().to_string(),
            lock_id: token.lock_id(),
            holder: token.holder(),
        }
    }
}

impl<K, V, M, I, L> CacheMetrics for ReadWriteStrategy<K, V, M, I, L>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.to_btreemap();
        // Lock-store gauges are left out while the store is unreachable.
        if let Ok(records) = self.locks.len() {
            metrics.insert("lock_records".to_string(), records as f64);
        }
        if let Ok(held) = self.locks.held_count() {
            metrics.insert("held_locks".to_string(), held as f64);
        }
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "ReadWrite"
    }
}

impl<K, V, M, I, L> fmt::Debug for ReadWriteStrategy<K, V, M, I, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteStrategy")
            .field("config", &self.config)
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Switchable;
    use crate::timestamp::ManualClock;
    use core::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Strategy = ReadWriteStrategy<&'static str, &'static str>;

    fn strategy_with(config: RegionConfig) -> (Strategy, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let strategy = ReadWriteStrategy::new(
            config,
            LocalMap::new(4),
            LocalInvalidationStore::new(),
            SoftLockTable::new(4),
            clock.clone(),
        )
        .unwrap();
        (strategy, clock)
    }

    fn strategy() -> (Strategy, Arc<ManualClock>) {
        strategy_with(RegionConfig {
            segments: 4,
            ..RegionConfig::named("test")
        })
    }

    fn ts(ticks: u64) -> Timestamp {
        Timestamp::from_ticks(ticks)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let clock = Arc::new(ManualClock::new());
        let result: Result<Strategy> = ReadWriteStrategy::new(
            RegionConfig {
                segments: 0,
                ..RegionConfig::named("bad")
            },
            LocalMap::new(1),
            LocalInvalidationStore::new(),
            SoftLockTable::new(1),
            clock,
        );
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_get_miss_then_put_then_hit() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        assert_eq!(cache.get(&"k", tx).unwrap(), None);

        let load = cache.next_timestamp();
        let outcome = cache.put_from_load("k", "v", load, tx, false).unwrap();
        assert_eq!(outcome, PutOutcome::Stored);
        assert_eq!(cache.get(&"k", tx).unwrap(), Some("v"));

        let entry = cache.region().load(&"k").unwrap().unwrap();
        assert_eq!(entry.timestamp, load);
    }

    #[test]
    fn test_put_rejected_while_locked() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();

        let load = cache.next_timestamp();
        let outcome = cache.put_from_load("k", "v", load, load, false).unwrap();
        assert_eq!(outcome, PutOutcome::Skipped(SkipReason::Locked));
        assert_eq!(cache.get(&"k", load).unwrap(), None);

        cache.release(&"k", token).unwrap();
    }

    #[test]
    fn test_locked_key_stays_readable() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();
        cache.put_from_load("k", "old", load, load, false).unwrap();

        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        assert_eq!(cache.get(&"k", tx).unwrap(), Some("old"));
        cache.after_update("k", "new", tx, token).unwrap();
        assert_eq!(cache.get(&"k", tx).unwrap(), Some("new"));
    }

    #[test]
    fn test_load_before_update_is_rejected() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();

        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.after_update("k", "new", tx, token).unwrap();

        let outcome = cache.put_from_load("k", "old", load, load, false).unwrap();
        assert_eq!(outcome, PutOutcome::Skipped(SkipReason::UnlockedAfterLoad));
        assert_eq!(cache.get(&"k", cache.next_timestamp()).unwrap(), Some("new"));
    }

    #[test]
    fn test_unlock_timestamp_tie_rejects() {
        let (cache, clock) = strategy();
        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.release(&"k", token).unwrap();
        let unlocked = clock.peek();

        assert_eq!(
            cache.put_from_load("k", "v", unlocked, unlocked, false).unwrap(),
            PutOutcome::Skipped(SkipReason::UnlockedAfterLoad)
        );
        let after = ts(unlocked.ticks() + 1);
        assert_eq!(
            cache.put_from_load("k", "v", after, after, false).unwrap(),
            PutOutcome::Stored
        );
    }

    #[test]
    fn test_evict_all_marker_rejects_older_loads() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();
        cache.put_from_load("a", "v", load, load, false).unwrap();

        let marker = cache.evict_all().unwrap();
        assert!(marker > load);
        assert_eq!(cache.get(&"a", cache.next_timestamp()).unwrap(), None);

        // Load captured before the invalidation.
        assert_eq!(
            cache.put_from_load("b", "v", load, load, false).unwrap(),
            PutOutcome::Skipped(SkipReason::Invalidated)
        );
        // Tie with the marker rejects.
        assert_eq!(
            cache.put_from_load("b", "v", marker, marker, false).unwrap(),
            PutOutcome::Skipped(SkipReason::Invalidated)
        );

        let fresh = cache.next_timestamp();
        assert_eq!(
            cache.put_from_load("a", "v2", fresh, fresh, false).unwrap(),
            PutOutcome::Stored
        );
        assert_eq!(cache.get(&"a", fresh).unwrap(), Some("v2"));
    }

    #[test]
    fn test_evict_all_keeps_lock_records() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();

        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.evict_all().unwrap();
        assert!(cache.lock_table().snapshot(&"k").unwrap().is_locked());
        cache.after_update("k", "new", tx, token).unwrap();
        cache.evict_all().unwrap();

        let record = cache.lock_table().snapshot(&"k").unwrap();
        assert!(!record.is_locked());
        assert!(record.unlock_timestamp().is_some());

        let outcome = cache.put_from_load("k", "old", load, load, false).unwrap();
        assert!(!outcome.is_stored());
        assert_ne!(cache.get(&"k", cache.next_timestamp()).unwrap(), Some("old"));
    }

    #[test]
    fn test_clear_on_evict_all() {
        let (cache, _) = strategy_with(RegionConfig {
            segments: 2,
            clear_on_evict_all: true,
            ..RegionConfig::named("clearing")
        });
        for key in ["a", "b", "c"] {
            let load = cache.next_timestamp();
            cache.put_from_load(key, "v", load, load, false).unwrap();
        }
        assert_eq!(cache.region().len().unwrap(), 3);
        cache.evict_all().unwrap();
        assert_eq!(cache.region().len().unwrap(), 0);
    }

    #[test]
    fn test_lazy_evict_all_keeps_entries_but_hides_them() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();
        cache.put_from_load("a", "v", load, load, false).unwrap();
        cache.evict_all().unwrap();
        assert_eq!(cache.region().len().unwrap(), 1);
        assert_eq!(cache.get(&"a", cache.next_timestamp()).unwrap(), None);
    }

    #[test]
    fn test_minimal_put() {
        let (cache, _) = strategy();
        let first = cache.next_timestamp();
        cache.put_from_load("k", "v1", first, first, true).unwrap();

        let second = cache.next_timestamp();
        assert_eq!(
            cache.put_from_load("k", "v2", second, second, true).unwrap(),
            PutOutcome::Skipped(SkipReason::MinimalPut)
        );
        // Without minimal puts a newer load replaces the entry.
        assert_eq!(
            cache.put_from_load("k", "v2", second, second, false).unwrap(),
            PutOutcome::Stored
        );
        assert_eq!(cache.get(&"k", second).unwrap(), Some("v2"));
    }

    #[test]
    fn test_minimal_puts_config_forces_flag() {
        let (cache, _) = strategy_with(RegionConfig {
            segments: 1,
            minimal_puts: true,
            ..RegionConfig::named("minimal")
        });
        let first = cache.next_timestamp();
        cache.put_from_load("k", "v1", first, first, false).unwrap();
        let second = cache.next_timestamp();
        assert_eq!(
            cache.put_from_load("k", "v2", second, second, false).unwrap(),
            PutOutcome::Skipped(SkipReason::MinimalPut)
        );
    }

    #[test]
    fn test_minimal_put_ignores_invalidated_entry() {
        let (cache, _) = strategy();
        let first = cache.next_timestamp();
        cache.put_from_load("k", "v1", first, first, true).unwrap();
        cache.evict_all().unwrap();

        let second = cache.next_timestamp();
        assert_eq!(
            cache.put_from_load("k", "v2", second, second, true).unwrap(),
            PutOutcome::Stored
        );
    }

    #[test]
    fn test_older_load_never_replaces_newer_entry() {
        let (cache, _) = strategy();
        let older = cache.next_timestamp();
        let newer = cache.next_timestamp();
        cache.put_from_load("k", "newer", newer, newer, false).unwrap();

        assert_eq!(
            cache.put_from_load("k", "older", older, older, false).unwrap(),
            PutOutcome::Skipped(SkipReason::NewerEntry)
        );
        assert_eq!(
            cache.put_from_load("k", "same", newer, newer, false).unwrap(),
            PutOutcome::Skipped(SkipReason::NewerEntry)
        );
        assert_eq!(cache.get(&"k", newer).unwrap(), Some("newer"));
    }

    #[test]
    fn test_after_update_writes_tx_timestamp() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.after_update("k", "new", tx, token).unwrap();

        let entry = cache.region().load(&"k").unwrap().unwrap();
        assert_eq!(entry, CacheEntry::new("new", tx));
        assert!(!cache.lock_table().snapshot(&"k").unwrap().is_locked());
    }

    #[test]
    fn test_after_update_evicts_when_newer_entry_cached() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        let load = cache.next_timestamp();
        cache.put_from_load("k", "loaded", load, load, false).unwrap();

        let token = cache.lock("k", tx).unwrap();
        cache.after_update("k", "committed", tx, token).unwrap();
        assert_eq!(cache.region().load(&"k").unwrap(), None);
        assert_eq!(cache.stats().updates_evicted, 1);
    }

    #[test]
    fn test_overlapping_writers_evict() {
        let (cache, _) = strategy();
        let tx_a = cache.next_timestamp();
        let tx_b = cache.next_timestamp();
        let a = cache.lock("k", tx_a).unwrap();
        let b = cache.lock("k", tx_b).unwrap();

        cache.after_update("k", "from-b", tx_b, b).unwrap();
        assert_eq!(cache.get(&"k", tx_b).unwrap(), None);
        assert!(cache.lock_table().snapshot(&"k").unwrap().is_locked());

        cache.after_update("k", "from-a", tx_a, a).unwrap();
        assert_eq!(cache.get(&"k", tx_a).unwrap(), None);
        assert!(!cache.lock_table().snapshot(&"k").unwrap().is_locked());
    }

    #[test]
    fn test_after_update_invalid_token_evicts() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();
        cache.put_from_load("k", "cached", load, load, false).unwrap();

        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.release(&"k", token).unwrap();

        let err = cache.after_update("k", "new", tx, token).unwrap_err();
        assert!(matches!(err, CacheError::InvalidLockToken { .. }));
        assert_eq!(cache.region().load(&"k").unwrap(), None);
        assert_eq!(cache.stats().invalid_tokens, 1);
    }

    #[test]
    fn test_double_release_is_invalid() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        cache.release(&"k", token).unwrap();

        let err = cache.release(&"k", token).unwrap_err();
        assert_eq!(
            err,
            CacheError::InvalidLockToken {
                region: "test".to_string(),
                lock_id: token.lock_id(),
                holder: token.holder(),
            }
        );
        assert_eq!(cache.lock_table().snapshot(&"k").unwrap().multiplicity(), 0);
    }

    #[test]
    fn test_evict_is_idempotent_and_keeps_locks() {
        let (cache, _) = strategy();
        let load = cache.next_timestamp();
        cache.put_from_load("k", "v", load, load, false).unwrap();
        let token = cache.lock("k", cache.next_timestamp()).unwrap();

        cache.evict(&"k").unwrap();
        cache.evict(&"k").unwrap();
        assert_eq!(cache.get(&"k", load).unwrap(), None);
        assert!(cache.lock_table().snapshot(&"k").unwrap().is_locked());
        cache.release(&"k", token).unwrap();
    }

    #[test]
    fn test_purge_expired_locks() {
        let (cache, clock) = strategy_with(RegionConfig {
            segments: 1,
            unlock_grace: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(30),
            ..RegionConfig::named("purge")
        });

        let released = cache.lock("released", cache.next_timestamp()).unwrap();
        cache.release(&"released", released).unwrap();
        let _held = cache.lock("held", cache.next_timestamp()).unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.purge_expired_locks().unwrap(), 0);
        assert_eq!(cache.lock_table().len(), 2);

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.purge_expired_locks().unwrap(), 1);
        assert!(cache.lock_table().snapshot(&"released").is_none());
        assert!(cache.lock_table().snapshot(&"held").unwrap().is_locked());

        clock.advance(Duration::from_secs(20));
        cache.purge_expired_locks().unwrap();
        let record = cache.lock_table().snapshot(&"held").unwrap();
        assert!(!record.is_locked());
        assert_eq!(cache.stats().abandoned_locks, 1);
    }

    #[test]
    fn test_substrate_failures_surface() {
        let clock = Arc::new(ManualClock::new());
        let map: Arc<Switchable<LocalMap<&str, CacheEntry<&str>>>> =
            Arc::new(Switchable::new(LocalMap::new(2)));
        let marker = Arc::new(Switchable::new(LocalInvalidationStore::new()));
        let cache: ReadWriteStrategy<&str, &str, _, _> = ReadWriteStrategy::new(
            RegionConfig::named("flaky"),
            Arc::clone(&map),
            Arc::clone(&marker),
            SoftLockTable::new(2),
            clock,
        )
        .unwrap();

        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        map.set_available(false);

        assert!(cache.get(&"k", tx).unwrap_err().is_unavailable());
        assert!(cache.evict(&"k").unwrap_err().is_unavailable());
        assert!(cache.after_update("k", "v", tx, token).unwrap_err().is_unavailable());
        // The hold is released even though the write failed.
        assert!(!cache.lock_table().snapshot(&"k").unwrap().is_locked());

        let load = cache.next_timestamp();
        assert!(cache
            .put_from_load("other", "v", load, load, false)
            .unwrap_err()
            .is_unavailable());

        map.set_available(true);
        marker.set_available(false);
        assert!(cache.evict_all().unwrap_err().is_unavailable());
        assert!(cache.get(&"k", tx).unwrap_err().is_unavailable());
    }

    type Node = ReadWriteStrategy<
        &'static str,
        &'static str,
        Arc<LocalMap<&'static str, CacheEntry<&'static str>>>,
        Arc<LocalInvalidationStore>,
        Arc<SoftLockTable<&'static str>>,
    >;

    /// Two strategy instances over one map, marker and lock store, as two nodes
    /// of a cluster would be.
    fn two_nodes() -> (Node, Node) {
        let clock = Arc::new(ManualClock::new());
        let map = Arc::new(LocalMap::new(2));
        let marker = Arc::new(LocalInvalidationStore::new());
        let locks = Arc::new(SoftLockTable::new(2));
        let node = || {
            ReadWriteStrategy::new(
                RegionConfig::named("shared"),
                Arc::clone(&map),
                Arc::clone(&marker),
                Arc::clone(&locks),
                clock.clone(),
            )
            .unwrap()
        };
        (node(), node())
    }

    #[test]
    fn test_write_on_one_node_rejects_stale_load_on_another() {
        let (node_a, node_b) = two_nodes();

        let tx = node_a.next_timestamp();
        let token = node_a.lock("k", tx).unwrap();
        let load = node_b.next_timestamp();
        node_a.after_update("k", "new", tx, token).unwrap();

        assert_eq!(
            node_b.put_from_load("k", "old", load, load, false).unwrap(),
            PutOutcome::Skipped(SkipReason::UnlockedAfterLoad)
        );
        let now = node_b.next_timestamp();
        assert_eq!(node_b.get(&"k", now).unwrap(), Some("new"));
        assert_eq!(node_a.get(&"k", now).unwrap(), Some("new"));
    }

    #[test]
    fn test_hold_on_one_node_blocks_load_on_another() {
        let (node_a, node_b) = two_nodes();

        let token = node_a.lock("k", node_a.next_timestamp()).unwrap();
        let load = node_b.next_timestamp();
        assert_eq!(
            node_b.put_from_load("k", "old", load, load, false).unwrap(),
            PutOutcome::Skipped(SkipReason::Locked)
        );
        assert!(node_b.lock_table().snapshot(&"k").unwrap().unwrap().is_locked());

        // Either node may release the hold.
        node_b.release(&"k", token).unwrap();
        assert_eq!(node_a.lock_table().held_count().unwrap(), 0);
    }

    #[test]
    fn test_lock_store_failures_surface() {
        let clock = Arc::new(ManualClock::new());
        let locks = Arc::new(Switchable::new(SoftLockTable::new(2)));
        let cache: ReadWriteStrategy<&str, &str, _, _, _> = ReadWriteStrategy::new(
            RegionConfig::named("flaky-locks"),
            LocalMap::new(2),
            LocalInvalidationStore::new(),
            Arc::clone(&locks),
            clock,
        )
        .unwrap();

        let load = cache.next_timestamp();
        cache.put_from_load("k", "cached", load, load, false).unwrap();
        let tx = cache.next_timestamp();
        let token = cache.lock("k", tx).unwrap();
        locks.set_available(false);

        // Reads never touch the lock store.
        assert_eq!(cache.get(&"k", tx).unwrap(), Some("cached"));
        assert!(cache.lock("k", tx).unwrap_err().is_unavailable());
        assert!(cache.release(&"k", token).unwrap_err().is_unavailable());
        assert!(cache.after_update("k", "new", tx, token).unwrap_err().is_unavailable());
        let load = cache.next_timestamp();
        assert!(cache
            .put_from_load("other", "v", load, load, false)
            .unwrap_err()
            .is_unavailable());
        assert!(cache.purge_expired_locks().unwrap_err().is_unavailable());
        // The failed publish still evicted the pre-commit value.
        assert_eq!(cache.get(&"k", tx).unwrap(), None);
        assert!(!cache.metrics().contains_key("held_locks"));

        locks.set_available(true);
        cache.after_update("k", "new", tx, token).unwrap();
        assert_eq!(cache.get(&"k", cache.next_timestamp()).unwrap(), Some("new"));
    }

    #[test]
    fn test_put_hook_runs_before_put() {
        let (cache, _) = strategy();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        cache.set_put_hook(move |_key| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let load = cache.next_timestamp();
        cache.put_from_load("k", "v", load, load, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.clear_put_hook();
        let load = cache.next_timestamp();
        cache.put_from_load("k", "v", load, load, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metrics_report() {
        let (cache, _) = strategy();
        let tx = cache.next_timestamp();
        cache.get(&"k", tx).unwrap();
        let token = cache.lock("k", tx).unwrap();
        cache.put_from_load("k", "v", tx, tx, false).unwrap();
        cache.release(&"k", token).unwrap();

        assert_eq!(cache.algorithm_name(), "ReadWrite");
        let metrics = cache.metrics();
        assert_eq!(metrics["gets"], 1.0);
        assert_eq!(metrics["cache_misses"], 1.0);
        assert_eq!(metrics["puts_skipped_locked"], 1.0);
        assert_eq!(metrics["locks"], 1.0);
        assert_eq!(metrics["releases"], 1.0);
        assert_eq!(metrics["lock_records"], 1.0);
        assert_eq!(metrics["held_locks"], 0.0);
    }
}
