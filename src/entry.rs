//! Cache Entry Type
//!
//! A [`CacheEntry`] is what the region stores per key: the cached value and the
//! logical time at which that value became valid.
//!
//! # Timestamp Semantics
//!
//! | Writer | Entry timestamp |
//! |--------|-----------------|
//! | `put_from_load` | the load timestamp captured *before* the authoritative read |
//! | `after_update` | the writing transaction's timestamp |
//!
//! The strategy never replaces an entry with one carrying an older timestamp, so
//! the sequence of timestamps observed for a key is non-decreasing.
//!
//! An entry whose timestamp is not newer than the region's invalidation marker is
//! treated as absent; see [`CacheEntry::is_valid_after`].

use crate::timestamp::Timestamp;
use core::fmt;

/// A cached value plus the instant it became valid.
///
/// # Examples
///
/// ```
/// use rw_cache::entry::CacheEntry;
/// use rw_cache::timestamp::Timestamp;
///
/// let entry = CacheEntry::new("old-value", Timestamp::from_ticks(10));
/// assert!(entry.is_valid_after(Timestamp::from_ticks(9)));
/// assert!(!entry.is_valid_after(Timestamp::from_ticks(10)));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    /// The cached value (row state, collection snapshot, or an opaque blob).
    pub value: V,

    /// Logical time at which `value` became valid.
    pub timestamp: Timestamp,
}

impl<V> CacheEntry<V> {
    /// Creates an entry.
    #[inline]
    pub fn new(value: V, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }

    /// Returns `true` if the entry was written strictly after `marker`.
    ///
    /// Entries written at or before a region invalidation are stale.
    #[inline]
    pub fn is_valid_after(&self, marker: Timestamp) -> bool {
        self.timestamp > marker
    }

    /// Returns `true` if this entry is at least as fresh as a candidate written at
    /// `timestamp`, meaning the candidate must not replace it.
    #[inline]
    pub fn supersedes(&self, timestamp: Timestamp) -> bool {
        self.timestamp >= timestamp
    }

    /// Consumes the entry and returns the value.
    #[inline]
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
