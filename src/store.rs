//! Distributed Substrate Seam
//!
//! The strategy never owns storage. Entries live in a [`DistributedMap`], the
//! region invalidation marker lives in an [`InvalidationStore`] and soft-lock
//! records live in a [`LockStore`]. The deployment supplies all three (a
//! data-grid client, a replicated map, ...) and every node serving the region must
//! see the same instances. This module defines the traits and ships in-process
//! implementations used for single-node deployments, tests and simulations.
//!
//! # Local Map Layout
//!
//! [`LocalMap`] uses the same lock striping as the rest of the crate:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        LocalMap (N segments)                       │
//! │                                                                    │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐     ┌─────────┐              │
//! │  │Segment 0│ │Segment 1│ │Segment 2│ ... │Seg N-1  │              │
//! │  │ [Mutex] │ │ [Mutex] │ │ [Mutex] │     │ [Mutex] │              │
//! │  └─────────┘ └─────────┘ └─────────┘     └─────────┘              │
//! │       ▲           ▲           ▲               ▲                   │
//! │  hash(k1)%N   hash(k2)%N  hash(k3)%N     hash(kM)%N               │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Puts are last-write-wins per key, which is the contract the strategy expects
//! from any substrate.

use crate::lock::{LockRecord, PurgeStats, SoftLock};
use crate::timestamp::Timestamp;
use core::hash::{BuildHasher, Hash};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "hashbrown")]
use hashbrown::{DefaultHashBuilder, HashMap};

#[cfg(not(feature = "hashbrown"))]
use std::collections::{hash_map::RandomState as DefaultHashBuilder, HashMap};

/// Failure reported by a substrate.
///
/// The region adapter turns this into
/// [`CacheError::InfrastructureUnavailable`](crate::CacheError::InfrastructureUnavailable).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates an error from any message.
    pub fn new(reason: impl Into<String>) -> Self {
        StoreError(reason.into())
    }
}

/// A key-value map shared by every node that serves the region.
///
/// Implementations must provide last-write-wins semantics under concurrent `put`
/// for the same key and make writes visible cluster-wide within a bounded delay.
/// Timeouts and retries belong to the implementation, not to the strategy.
pub trait DistributedMap<K, V>: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: K, value: V) -> Result<(), StoreError>;

    /// Removes `key`, returning the previous value.
    fn remove(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Removes every key.
    fn clear(&self) -> Result<(), StoreError>;

    /// Number of stored keys.
    fn len(&self) -> Result<usize, StoreError>;
}

/// Cluster-visible home of a region's invalidation marker.
pub trait InvalidationStore: Send + Sync {
    /// Reads the current marker.
    fn current(&self) -> Result<Timestamp, StoreError>;

    /// Atomically raises the marker to `max(current, to)` and returns the result.
    fn raise(&self, to: Timestamp) -> Result<Timestamp, StoreError>;
}

/// Cluster-visible home of the soft-lock records of a region.
///
/// The in-process implementation is [`SoftLockTable`](crate::lock::SoftLockTable).
pub trait LockStore<K>: Send + Sync {
    /// Runs `f` on the record of `key` and persists whatever it leaves behind.
    ///
    /// No other call for the same key, from any node, may interleave with `f`.
    /// A distributed implementation runs this as an entry processor or under a
    /// per-key lock.
    fn with_record<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockRecord<'_>) -> R,
    ) -> Result<R, StoreError>;

    /// Copy of the record of `key`.
    fn snapshot(&self, key: &K) -> Result<Option<SoftLock>, StoreError>;

    /// Force-unlocks holds whose timeout is before `now`, then drops unlocked
    /// records released more than `grace` ago.
    fn purge(&self, now: Timestamp, grace: Duration) -> Result<PurgeStats, StoreError>;

    /// Number of records, held or recently unlocked.
    fn len(&self) -> Result<usize, StoreError>;

    /// Number of records with at least one holder.
    fn held_count(&self) -> Result<usize, StoreError>;
}

impl<K, V, M> DistributedMap<K, V> for Arc<M>
where
    M: DistributedMap<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &K) -> Result<Option<V>, StoreError> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }

    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }
}

impl<I> InvalidationStore for Arc<I>
where
    I: InvalidationStore + ?Sized,
{
    fn current(&self) -> Result<Timestamp, StoreError> {
        (**self).current()
    }

    fn raise(&self, to: Timestamp) -> Result<Timestamp, StoreError> {
        (**self).raise(to)
    }
}

impl<K, L> LockStore<K> for Arc<L>
where
    L: LockStore<K>,
{
    fn with_record<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockRecord<'_>) -> R,
    ) -> Result<R, StoreError> {
        (**self).with_record(key, f)
    }

    fn snapshot(&self, key: &K) -> Result<Option<SoftLock>, StoreError> {
        (**self).snapshot(key)
    }

    fn purge(&self, now: Timestamp, grace: Duration) -> Result<PurgeStats, StoreError> {
        (**self).purge(now, grace)
    }

    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }

    fn held_count(&self) -> Result<usize, StoreError> {
        (**self).held_count()
    }
}

/// In-process segmented map.
///
/// Wrap it in an `Arc` to let several strategy instances (simulated nodes) share
/// one substrate.
///
/// # Example
///
/// ```
/// use rw_cache::store::{DistributedMap, LocalMap};
///
/// let map: LocalMap<&str, i32> = LocalMap::new(4);
/// map.put("a", 1).unwrap();
/// assert_eq!(map.get(&"a").unwrap(), Some(1));
/// assert_eq!(map.remove(&"a").unwrap(), Some(1));
/// assert_eq!(map.len().unwrap(), 0);
/// ```
pub struct LocalMap<K, V, S = DefaultHashBuilder> {
    segments: Box<[Mutex<HashMap<K, V, S>>]>,
    hash_builder: S,
}

impl<K, V> LocalMap<K, V, DefaultHashBuilder>
where
    K: Hash + Eq,
{
    /// Creates a map with `segments` independent stripes (at least one).
    pub fn new(segments: usize) -> Self {
        Self::with_hasher(segments, DefaultHashBuilder::default())
    }
}

impl<K, V, S> LocalMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Creates a map with a custom hash builder, cloned into every segment.
    pub fn with_hasher(segments: usize, hash_builder: S) -> Self {
        let segments: Vec<_> = (0..segments.max(1))
            .map(|_| Mutex::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
        }
    }

    #[inline]
    fn segment(&self, key: &K) -> &Mutex<HashMap<K, V, S>> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl<K, V, S> DistributedMap<K, V> for LocalMap<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
    S: BuildHasher + Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.segment(key).lock().get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        self.segment(&key).lock().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.segment(key).lock().remove(key))
    }

    fn clear(&self) -> Result<(), StoreError> {
        for segment in self.segments.iter() {
            segment.lock().clear();
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.segments.iter().map(|s| s.lock().len()).sum())
    }
}

impl<K, V, S> core::fmt::Debug for LocalMap<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalMap")
            .field("segment_count", &self.segments.len())
            .field(
                "total_len",
                &self.segments.iter().map(|s| s.lock().len()).sum::<usize>(),
            )
            .finish()
    }
}

/// In-process invalidation marker backed by one atomic.
#[derive(Debug, Default)]
pub struct LocalInvalidationStore {
    marker: AtomicU64,
}

impl LocalInvalidationStore {
    /// Creates a store whose marker is [`Timestamp::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvalidationStore for LocalInvalidationStore {
    fn current(&self) -> Result<Timestamp, StoreError> {
        Ok(Timestamp::from_ticks(self.marker.load(Ordering::Acquire)))
    }

    fn raise(&self, to: Timestamp) -> Result<Timestamp, StoreError> {
        let previous = self.marker.fetch_max(to.ticks(), Ordering::AcqRel);
        Ok(Timestamp::from_ticks(previous.max(to.ticks())))
    }
}

/// Substrate wrapper that fails every call while switched off.
///
/// Lets callers exercise the "map unreachable" path of an otherwise healthy
/// substrate, e.g. to rehearse fallback to the authoritative store.
///
/// # Example
///
/// ```
/// use rw_cache::store::{DistributedMap, LocalMap, Switchable};
///
/// let map = Switchable::new(LocalMap::<u32, u32>::new(1));
/// map.put(1, 1).unwrap();
/// map.set_available(false);
/// assert!(map.get(&1).is_err());
/// map.set_available(true);
/// assert_eq!(map.get(&1).unwrap(), Some(1));
/// ```
#[derive(Debug)]
pub struct Switchable<T> {
    inner: T,
    available: AtomicBool,
}

impl<T> Switchable<T> {
    /// Wraps `inner`, initially available.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    /// Turns the substrate on or off.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Returns the wrapped substrate.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::new("substrate unreachable"))
        }
    }
}

impl<K, V, T> DistributedMap<K, V> for Switchable<T>
where
    T: DistributedMap<K, V>,
{
    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.check()?;
        self.inner.get(key)
    }

    fn put(&self, key: K, value: V) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value)
    }

    fn remove(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.check()?;
        self.inner.remove(key)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.clear()
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.len()
    }
}

impl<T: InvalidationStore> InvalidationStore for Switchable<T> {
    fn current(&self) -> Result<Timestamp, StoreError> {
        self.check()?;
        self.inner.current()
    }

    fn raise(&self, to: Timestamp) -> Result<Timestamp, StoreError> {
        self.check()?;
        self.inner.raise(to)
    }
}

impl<K, T: LockStore<K>> LockStore<K> for Switchable<T> {
    fn with_record<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockRecord<'_>) -> R,
    ) -> Result<R, StoreError> {
        self.check()?;
        self.inner.with_record(key, f)
    }

    fn snapshot(&self, key: &K) -> Result<Option<SoftLock>, StoreError> {
        self.check()?;
        self.inner.snapshot(key)
    }

    fn purge(&self, now: Timestamp, grace: Duration) -> Result<PurgeStats, StoreError> {
        self.check()?;
        self.inner.purge(now, grace)
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.len()
    }

    fn held_count(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.held_count()
    }
}
