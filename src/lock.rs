//! Soft Locks
//!
//! Per-key record of in-flight write intent. A soft lock never blocks anyone: the
//! authoritative store's own transaction isolation decides between writers. The
//! record exists so that a *load* racing with a write can tell it lost.
//!
//! # Record Lifecycle
//!
//! ```text
//!              lock                 lock                 release
//!  (absent) ────────▶ Locked(1) ────────▶ Locked(2) ────────▶ Locked(1)
//!                         │                                      │
//!                         │ release                              │ release
//!                         ▼                                      ▼
//!                  Unlocked(unlock_ts) ◀─────────────────────────┘
//!                         │
//!                         │ purge (unlock_ts older than the grace window)
//!                         ▼
//!                      (absent)
//! ```
//!
//! A record that drops to zero holders is *kept* with the time of the release.
//! That timestamp is what rejects a load which started before the write committed
//! but tries to populate the cache after it. Region-wide invalidation never
//! touches lock records.
//!
//! # Where Records Live
//!
//! Records are substrate state, reached through the
//! [`LockStore`](crate::store::LockStore) trait. Every node fronting the same
//! [`DistributedMap`](crate::store::DistributedMap) must use the same lock store,
//! otherwise a write on one node cannot reject a load on another.
//! [`SoftLockTable`] is the in-process implementation: keys are striped across
//! segments by hash, each behind its own `parking_lot::Mutex`.

use crate::store::{LockStore, StoreError};
use crate::strategy::SkipReason;
use crate::timestamp::Timestamp;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "hashbrown")]
use hashbrown::{DefaultHashBuilder, HashMap};

#[cfg(not(feature = "hashbrown"))]
use std::collections::{hash_map::RandomState as DefaultHashBuilder, HashMap};

/// The soft-lock record of one key.
///
/// `lock_id` is the record's generation: it changes every time the record goes
/// from zero holders to one, so a token from an earlier generation can never
/// release a later one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftLock {
    lock_id: u64,
    holders: Vec<u64>,
    concurrent: bool,
    unlock_timestamp: Option<Timestamp>,
    timeout: Timestamp,
}

impl SoftLock {
    /// Generation of the lock.
    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }

    /// Number of outstanding holders.
    pub fn multiplicity(&self) -> usize {
        self.holders.len()
    }

    /// Returns `true` while at least one holder remains.
    pub fn is_locked(&self) -> bool {
        !self.holders.is_empty()
    }

    /// Returns `true` if two holds overlapped during the current generation.
    pub fn was_locked_concurrently(&self) -> bool {
        self.concurrent
    }

    /// When the last holder released, if the record is currently unlocked.
    pub fn unlock_timestamp(&self) -> Option<Timestamp> {
        self.unlock_timestamp
    }

    /// Instant after which a still-held lock is considered abandoned.
    pub fn timeout(&self) -> Timestamp {
        self.timeout
    }

    /// Returns `true` if `token` is a current holder of this generation.
    pub fn is_held_by(&self, token: &LockToken) -> bool {
        self.lock_id == token.lock_id && self.holders.contains(&token.holder)
    }

    /// Checks whether a value loaded at `load_timestamp` may enter the cache.
    ///
    /// Ties reject: a load captured at the exact unlock instant is not trusted.
    pub fn admits_load(&self, load_timestamp: Timestamp) -> Result<(), SkipReason> {
        if self.is_locked() {
            return Err(SkipReason::Locked);
        }
        match self.unlock_timestamp {
            Some(unlocked) if load_timestamp <= unlocked => Err(SkipReason::UnlockedAfterLoad),
            _ => Ok(()),
        }
    }

    /// Drops every holder if the hold outlived its timeout, stamping `now` as
    /// the unlock instant. Returns `true` if the record was abandoned.
    pub fn abandon_if_expired(&mut self, now: Timestamp) -> bool {
        if !self.is_locked() || self.timeout >= now {
            return false;
        }
        tracing::warn!(
            lock_id = self.lock_id,
            holders = self.holders.len(),
            timeout = %self.timeout,
            "soft lock timed out while held, treating holders as abandoned"
        );
        self.holders.clear();
        self.unlock_timestamp = Some(now);
        true
    }

    /// Returns `true` for an unlocked record released more than `grace` before
    /// `now`.
    pub fn is_purgeable(&self, now: Timestamp, grace: Duration) -> bool {
        match self.unlock_timestamp {
            Some(unlocked) if !self.is_locked() => unlocked.saturating_add(grace) < now,
            _ => false,
        }
    }
}

/// One caller's hold on a soft lock. Returned by `lock`, consumed by
/// `after_update` or `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken {
    lock_id: u64,
    holder: u64,
}

impl LockToken {
    /// Generation of the lock this token belongs to.
    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }

    /// Unique holder id.
    pub fn holder(&self) -> u64 {
        self.holder
    }
}

/// Result of giving up a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain; carries the remaining multiplicity.
    StillHeld(usize),
    /// The last holder left; the record now carries this unlock timestamp.
    Unlocked(Timestamp),
    /// The token does not hold the lock. The record is unchanged.
    NotHeld,
}

/// Counts from one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Unlocked records dropped because their grace window elapsed.
    pub removed: usize,
    /// Held records whose timeout passed and were force-unlocked.
    pub abandoned: usize,
}

impl PurgeStats {
    fn merge(self, other: PurgeStats) -> PurgeStats {
        PurgeStats {
            removed: self.removed + other.removed,
            abandoned: self.abandoned + other.abandoned,
        }
    }
}

/// Issues holder ids and lock generations.
///
/// Ids must be unique across every node sharing a lock store. A store shared by
/// several processes gives each node its own range with
/// [`for_node`](Self::for_node).
#[derive(Debug, Default)]
pub struct HolderIds {
    next: AtomicU64,
}

impl HolderIds {
    /// Ids starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids in the range reserved for `node`: the node number occupies the top
    /// 16 bits.
    pub fn for_node(node: u16) -> Self {
        Self {
            next: AtomicU64::new(u64::from(node) << 48),
        }
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Exclusive access to one key's record, handed out by
/// [`LockStore::with_record`].
///
/// The slot is `None` while the key has no record. Whatever the slot holds when
/// the closure returns is what the store persists.
pub struct LockRecord<'a> {
    slot: &'a mut Option<SoftLock>,
    ids: &'a HolderIds,
}

impl<'a> LockRecord<'a> {
    /// Wraps a store's slot for one key.
    pub fn new(slot: &'a mut Option<SoftLock>, ids: &'a HolderIds) -> Self {
        Self { slot, ids }
    }

    /// The current record, if any.
    pub fn get(&self) -> Option<&SoftLock> {
        self.slot.as_ref()
    }

    /// Checks whether a load captured at `load_timestamp` may populate the key.
    pub fn admits_load(&self, load_timestamp: Timestamp) -> Result<(), SkipReason> {
        self.slot
            .as_ref()
            .map_or(Ok(()), |record| record.admits_load(load_timestamp))
    }

    /// Returns `true` if `token` currently holds the key.
    pub fn is_held_by(&self, token: &LockToken) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|record| record.is_held_by(token))
    }

    /// Returns `true` if the current generation saw overlapping holds.
    pub fn was_locked_concurrently(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(SoftLock::was_locked_concurrently)
    }

    /// Takes a hold. Never waits for other holders.
    pub fn acquire(&mut self, timeout: Timestamp) -> LockToken {
        let holder = self.ids.next();
        let record = self.slot.get_or_insert_with(|| SoftLock {
            lock_id: 0,
            holders: Vec::new(),
            concurrent: false,
            unlock_timestamp: None,
            timeout,
        });

        if record.holders.is_empty() {
            record.lock_id = self.ids.next();
            record.concurrent = false;
            record.unlock_timestamp = None;
            record.timeout = timeout;
        } else {
            record.concurrent = true;
            record.timeout = record.timeout.max(timeout);
        }
        record.holders.push(holder);

        LockToken {
            lock_id: record.lock_id,
            holder,
        }
    }

    /// Gives up `token`'s hold, stamping `now` if it was the last one.
    pub fn release(&mut self, token: &LockToken, now: Timestamp) -> ReleaseOutcome {
        let Some(record) = self.slot.as_mut() else {
            return ReleaseOutcome::NotHeld;
        };
        if record.lock_id != token.lock_id {
            return ReleaseOutcome::NotHeld;
        }
        let Some(pos) = record.holders.iter().position(|h| *h == token.holder) else {
            return ReleaseOutcome::NotHeld;
        };

        record.holders.swap_remove(pos);
        if record.holders.is_empty() {
            record.unlock_timestamp = Some(now);
            ReleaseOutcome::Unlocked(now)
        } else {
            ReleaseOutcome::StillHeld(record.holders.len())
        }
    }
}

impl fmt::Debug for LockRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRecord")
            .field("record", &self.slot)
            .finish()
    }
}

/// In-process [`LockStore`]: segmented map from cache key to [`SoftLock`].
///
/// Several strategy instances in one process share a table through an `Arc`,
/// the same way they share a [`LocalMap`](crate::store::LocalMap).
///
/// # Example
///
/// ```
/// use rw_cache::lock::{ReleaseOutcome, SoftLockTable};
/// use rw_cache::store::LockStore;
/// use rw_cache::timestamp::Timestamp;
///
/// let table: SoftLockTable<&str> = SoftLockTable::new(4);
/// let token = table
///     .with_record(&"k", |record| record.acquire(Timestamp::from_ticks(1000)))
///     .unwrap();
/// assert_eq!(table.snapshot(&"k").unwrap().multiplicity(), 1);
///
/// let release = |now| {
///     table
///         .with_record(&"k", |record| record.release(&token, Timestamp::from_ticks(now)))
///         .unwrap()
/// };
/// assert_eq!(release(2), ReleaseOutcome::Unlocked(Timestamp::from_ticks(2)));
///
/// // Second release of the same token is refused.
/// assert_eq!(release(3), ReleaseOutcome::NotHeld);
/// ```
pub struct SoftLockTable<K, S = DefaultHashBuilder> {
    segments: Box<[Mutex<HashMap<K, SoftLock, S>>]>,
    hash_builder: S,
    ids: HolderIds,
}

impl<K> SoftLockTable<K, DefaultHashBuilder>
where
    K: Hash + Eq,
{
    /// Creates a table with `segments` stripes (at least one).
    pub fn new(segments: usize) -> Self {
        Self::with_hasher(segments, DefaultHashBuilder::default())
    }
}

impl<K, S> SoftLockTable<K, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Creates a table with a custom hash builder, cloned into every segment.
    pub fn with_hasher(segments: usize, hash_builder: S) -> Self {
        let segments: Vec<_> = (0..segments.max(1))
            .map(|_| Mutex::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
            ids: HolderIds::new(),
        }
    }

    #[inline]
    fn segment(&self, key: &K) -> &Mutex<HashMap<K, SoftLock, S>> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    /// Copy of the current record for `key`.
    pub fn snapshot(&self, key: &K) -> Option<SoftLock> {
        self.segment(key).lock().get(key).cloned()
    }

    /// Force-unlocks holds whose timeout is before `now`, then drops unlocked
    /// records older than `grace`.
    pub fn purge(&self, now: Timestamp, grace: Duration) -> PurgeStats {
        self.segments
            .iter()
            .map(|segment| {
                let mut records = segment.lock();
                let abandoned = records
                    .values_mut()
                    .map(|record| record.abandon_if_expired(now))
                    .filter(|abandoned| *abandoned)
                    .count();
                let before = records.len();
                records.retain(|_, record| !record.is_purgeable(now, grace));
                PurgeStats {
                    removed: before - records.len(),
                    abandoned,
                }
            })
            .fold(PurgeStats::default(), PurgeStats::merge)
    }

    /// Number of records, held or recently unlocked.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns `true` if no record exists.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.lock().is_empty())
    }

    /// Number of records that currently have at least one holder.
    pub fn held_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.lock().values().filter(|r| r.is_locked()).count())
            .sum()
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl<K, S> LockStore<K> for SoftLockTable<K, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    S: BuildHasher + Clone + Send + Sync,
{
    fn with_record<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockRecord<'_>) -> R,
    ) -> Result<R, StoreError> {
        let mut records = self.segment(key).lock();
        let mut slot = records.remove(key);
        let result = f(&mut LockRecord::new(&mut slot, &self.ids));
        if let Some(record) = slot {
            records.insert(key.clone(), record);
        }
        Ok(result)
    }

    fn snapshot(&self, key: &K) -> Result<Option<SoftLock>, StoreError> {
        Ok(SoftLockTable::snapshot(self, key))
    }

    fn purge(&self, now: Timestamp, grace: Duration) -> Result<PurgeStats, StoreError> {
        Ok(SoftLockTable::purge(self, now, grace))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(SoftLockTable::len(self))
    }

    fn held_count(&self) -> Result<usize, StoreError> {
        Ok(SoftLockTable::held_count(self))
    }
}

impl<K, S> fmt::Debug for SoftLockTable<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftLockTable")
            .field("segment_count", &self.segments.len())
            .field(
                "records",
                &self.segments.iter().map(|s| s.lock().len()).sum::<usize>(),
            )
            .finish()
    }
}
