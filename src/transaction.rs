//! Transaction-Scoped Access
//!
//! [`TxAccess`] is the integration point for an ORM unit of work. It captures the
//! transaction timestamp once at [`begin`](TxAccess::begin), takes soft locks as
//! writes are staged, and turns the transaction outcome into the matching
//! strategy calls:
//!
//! | Outcome | Staged update | Staged removal |
//! |---------|---------------|----------------|
//! | `commit` | `after_update(k, v, tx_ts, token)` | `evict(k)` then `release(k, token)` |
//! | `rollback` | `release(k, token)` | `release(k, token)` |
//! | dropped unfinished | as `rollback`, errors logged | as `rollback`, errors logged |
//!
//! Locks are taken before the authoritative write, so a load that overlaps the
//! transaction can never populate the cache with the pre-commit state.

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::lock::{LockToken, SoftLockTable};
use crate::store::{
    DistributedMap, InvalidationStore, LocalInvalidationStore, LocalMap, LockStore,
};
use crate::strategy::{PutOutcome, ReadWriteStrategy};
use crate::timestamp::Timestamp;
use core::fmt;
use core::hash::Hash;

enum Change<V> {
    Update(V),
    Remove,
}

struct StagedWrite<K, V> {
    key: K,
    token: LockToken,
    change: Change<V>,
}

/// One transaction's view of a read-write region.
///
/// # Example
///
/// ```
/// use rw_cache::{ReadWriteStrategy, RegionConfig, TxAccess};
///
/// let cache: ReadWriteStrategy<&str, i64> =
///     ReadWriteStrategy::local(RegionConfig::named("stock")).unwrap();
///
/// let mut tx = TxAccess::begin(&cache);
/// tx.update("sku-1", 41).unwrap();
/// // ... write the authoritative store, then:
/// tx.commit().unwrap();
///
/// let reader = TxAccess::begin(&cache);
/// assert_eq!(reader.get(&"sku-1").unwrap(), Some(41));
/// ```
pub struct TxAccess<
    'a,
    K,
    V,
    M = LocalMap<K, CacheEntry<V>>,
    I = LocalInvalidationStore,
    L = SoftLockTable<K>,
> where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    strategy: &'a ReadWriteStrategy<K, V, M, I, L>,
    tx_timestamp: Timestamp,
    staged: Vec<StagedWrite<K, V>>,
}

impl<'a, K, V, M, I, L> TxAccess<'a, K, V, M, I, L>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    /// Starts a transaction, capturing its timestamp.
    pub fn begin(strategy: &'a ReadWriteStrategy<K, V, M, I, L>) -> Self {
        Self {
            strategy,
            tx_timestamp: strategy.next_timestamp(),
            staged: Vec::new(),
        }
    }

    /// The timestamp captured at `begin`.
    pub fn tx_timestamp(&self) -> Timestamp {
        self.tx_timestamp
    }

    /// Number of staged writes.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Reads `key` from the cache.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.strategy.get(key, self.tx_timestamp)
    }

    /// Issues a load timestamp. Call it immediately *before* reading the
    /// authoritative store and pass it to [`put_from_load`](Self::put_from_load).
    pub fn load_timestamp(&self) -> Timestamp {
        self.strategy.next_timestamp()
    }

    /// Offers a value read from the authoritative store to the cache.
    pub fn put_from_load(&self, key: K, value: V, load_timestamp: Timestamp) -> Result<PutOutcome> {
        self.strategy
            .put_from_load(key, value, load_timestamp, self.tx_timestamp, false)
    }

    /// Locks `key` and stages `value` to be published on commit.
    ///
    /// Staging the same key again replaces the staged change without taking a
    /// second lock.
    pub fn update(&mut self, key: K, value: V) -> Result<()> {
        self.stage(key, Change::Update(value))
    }

    /// Locks `key` and stages its removal: on commit the entry is evicted.
    pub fn remove(&mut self, key: K) -> Result<()> {
        self.stage(key, Change::Remove)
    }

    fn stage(&mut self, key: K, change: Change<V>) -> Result<()> {
        if let Some(staged) = self.staged.iter_mut().find(|s| s.key == key) {
            staged.change = change;
            return Ok(());
        }
        let token = self.strategy.lock(key.clone(), self.tx_timestamp)?;
        self.staged.push(StagedWrite { key, token, change });
        Ok(())
    }

    /// Publishes every staged write, in staging order.
    ///
    /// Every write is attempted even after a failure; the first error is
    /// returned.
    pub fn commit(mut self) -> Result<()> {
        let staged = core::mem::take(&mut self.staged);
        let mut first_err = None;
        for StagedWrite { key, token, change } in staged {
            let result = match change {
                Change::Update(value) => {
                    self.strategy.after_update(key, value, self.tx_timestamp, token)
                }
                Change::Remove => {
                    let evicted = self.strategy.evict(&key);
                    let released = self.strategy.release(&key, token);
                    evicted.and(released)
                }
            };
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Releases every lock without writing.
    pub fn rollback(mut self) -> Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for StagedWrite { key, token, .. } in core::mem::take(&mut self.staged) {
            if let Err(err) = self.strategy.release(&key, token) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<K, V, M, I, L> Drop for TxAccess<'_, K, V, M, I, L>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    fn drop(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        tracing::warn!(
            region = %self.strategy.region_name(),
            tx_ts = %self.tx_timestamp,
            staged = self.staged.len(),
            "transaction dropped without commit or rollback, releasing locks"
        );
        if let Err(err) = self.release_all() {
            tracing::warn!(
                region = %self.strategy.region_name(),
                error = %err,
                "failed to release locks of dropped transaction"
            );
        }
    }
}

impl<K, V, M, I, L> fmt::Debug for TxAccess<'_, K, V, M, I, L>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
    M: DistributedMap<K, CacheEntry<V>>,
    I: InvalidationStore,
    L: LockStore<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxAccess")
            .field("region", &self.strategy.region_name())
            .field("tx_timestamp", &self.tx_timestamp)
            .field("staged", &self.staged.len())
            .finish()
    }
}
