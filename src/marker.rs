//! Region Invalidation Marker
//!
//! One timestamp per region meaning "nothing written at or before this instant is
//! trustworthy". `evict_all` raises it; `get` and `put_from_load` compare against
//! it. Raising the marker is additive: it never enumerates entries and never
//! touches the soft-lock records, so a broad invalidation cannot erase the per-key
//! unlock timestamps a concurrent load is about to be checked against.
//!
//! The marker lives in an [`InvalidationStore`] so every node serving the region
//! sees the same value.

use crate::error::{CacheError, Result};
use crate::store::InvalidationStore;
use crate::timestamp::Timestamp;
use core::fmt;
use std::sync::Arc;

/// Handle on a region's invalidation marker.
pub struct RegionInvalidationMarker<I> {
    region: Arc<str>,
    store: I,
}

impl<I: InvalidationStore> RegionInvalidationMarker<I> {
    /// Wraps `store` as the marker of region `region`.
    pub fn new(region: impl Into<Arc<str>>, store: I) -> Self {
        Self {
            region: region.into(),
            store,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &I {
        &self.store
    }

    /// Reads the current marker.
    pub fn current(&self) -> Result<Timestamp> {
        self.store.current().map_err(|e| self.unavailable(e.0))
    }

    /// Raises the marker to at least `to` and returns the resulting value.
    pub fn invalidate(&self, to: Timestamp) -> Result<Timestamp> {
        self.store.raise(to).map_err(|e| self.unavailable(e.0))
    }

    fn unavailable(&self, reason: String) -> CacheError {
        CacheError::InfrastructureUnavailable {
            region: self.region.to_string(),
            reason,
        }
    }
}

impl<I> fmt::Debug for RegionInvalidationMarker<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionInvalidationMarker")
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalInvalidationStore, Switchable};

    #[test]
    fn test_invalidate_is_monotonic() {
        let marker = RegionInvalidationMarker::new("r", LocalInvalidationStore::new());
        assert_eq!(marker.current().unwrap(), Timestamp::ZERO);

        assert_eq!(
            marker.invalidate(Timestamp::from_ticks(50)).unwrap(),
            Timestamp::from_ticks(50)
        );
        assert_eq!(
            marker.invalidate(Timestamp::from_ticks(20)).unwrap(),
            Timestamp::from_ticks(50)
        );
    }

    #[test]
    fn test_shared_marker_across_handles() {
        let store = Arc::new(LocalInvalidationStore::new());
        let node_a = RegionInvalidationMarker::new("r", Arc::clone(&store));
        let node_b = RegionInvalidationMarker::new("r", Arc::clone(&store));

        node_a.invalidate(Timestamp::from_ticks(7)).unwrap();
        assert_eq!(node_b.current().unwrap(), Timestamp::from_ticks(7));
    }

    #[test]
    fn test_unavailable_store() {
        let store = Switchable::new(LocalInvalidationStore::new());
        let marker = RegionInvalidationMarker::new("r", store);
        marker.store().set_available(false);
        assert!(marker.current().unwrap_err().is_unavailable());
        assert!(marker
            .invalidate(Timestamp::from_ticks(1))
            .unwrap_err()
            .is_unavailable());
    }
}
