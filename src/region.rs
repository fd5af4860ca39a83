//! Cache Region Adapter
//!
//! A [`CacheRegion`] is the thin layer between the strategy and the distributed
//! map holding the region's entries. It applies no policy. Its only job beyond
//! delegation is turning substrate failures into
//! [`CacheError::InfrastructureUnavailable`] tagged with the region name, so that
//! an outage is never mistaken for a miss.

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::store::{DistributedMap, StoreError};
use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

/// Entry storage of one region.
pub struct CacheRegion<K, V, M> {
    name: Arc<str>,
    map: M,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V, M> CacheRegion<K, V, M>
where
    M: DistributedMap<K, CacheEntry<V>>,
{
    /// Wraps `map` as the entry store of region `name`.
    pub fn new(name: impl Into<Arc<str>>, map: M) -> Self {
        Self {
            name: name.into(),
            map,
            _types: PhantomData,
        }
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying map.
    pub fn map(&self) -> &M {
        &self.map
    }

    /// Reads the entry for `key`.
    pub fn load(&self, key: &K) -> Result<Option<CacheEntry<V>>> {
        self.map.get(key).map_err(|e| self.unavailable(e))
    }

    /// Writes `entry` under `key`.
    pub fn store(&self, key: K, entry: CacheEntry<V>) -> Result<()> {
        self.map.put(key, entry).map_err(|e| self.unavailable(e))
    }

    /// Removes the entry for `key`, returning `true` if one existed.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.map
            .remove(key)
            .map(|previous| previous.is_some())
            .map_err(|e| self.unavailable(e))
    }

    /// Removes every entry. Soft locks are not entries and are never affected.
    pub fn clear(&self) -> Result<()> {
        self.map.clear().map_err(|e| self.unavailable(e))
    }

    /// Number of stored entries, valid or not.
    pub fn len(&self) -> Result<usize> {
        self.map.len().map_err(|e| self.unavailable(e))
    }

    /// Returns `true` if no entry is stored.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    pub(crate) fn unavailable(&self, err: StoreError) -> CacheError {
        CacheError::InfrastructureUnavailable {
            region: self.name.to_string(),
            reason: err.0,
        }
    }
}

impl<K, V, M> fmt::Debug for CacheRegion<K, V, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegion")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalMap, Switchable};
    use crate::timestamp::Timestamp;

    type FlakyMap = Switchable<LocalMap<u32, CacheEntry<&'static str>>>;

    fn region() -> CacheRegion<u32, &'static str, FlakyMap> {
        CacheRegion::new("people", Switchable::new(LocalMap::new(4)))
    }

    #[test]
    fn test_store_load_remove() {
        let region = region();
        assert!(region.is_empty().unwrap());

        region
            .store(1, CacheEntry::new("alice", Timestamp::from_ticks(3)))
            .unwrap();
        let entry = region.load(&1).unwrap().unwrap();
        assert_eq!(entry.value, "alice");
        assert_eq!(entry.timestamp, Timestamp::from_ticks(3));

        assert!(region.remove(&1).unwrap());
        assert!(!region.remove(&1).unwrap());
        assert_eq!(region.load(&1).unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let region = region();
        for i in 0..10 {
            region
                .store(i, CacheEntry::new("x", Timestamp::from_ticks(1)))
                .unwrap();
        }
        assert_eq!(region.len().unwrap(), 10);
        region.clear().unwrap();
        assert_eq!(region.len().unwrap(), 0);
    }

    #[test]
    fn test_failures_are_not_misses() {
        let region = region();
        region.map().set_available(false);

        let err = region.load(&1).unwrap_err();
        assert_eq!(
            err,
            CacheError::InfrastructureUnavailable {
                region: "people".to_string(),
                reason: "substrate unreachable".to_string(),
            }
        );
        assert!(region
            .store(1, CacheEntry::new("x", Timestamp::ZERO))
            .unwrap_err()
            .is_unavailable());
        assert!(region.remove(&1).unwrap_err().is_unavailable());
        assert!(region.clear().unwrap_err().is_unavailable());
    }
}
