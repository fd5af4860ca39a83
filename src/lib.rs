#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Lifecycle Mapping
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────────────────┐
//! │ ORM lifecycle point          │ Strategy call                                │
//! ├──────────────────────────────┼──────────────────────────────────────────────┤
//! │ transaction begins           │ next_timestamp()            (tx timestamp)   │
//! │ cache lookup                 │ get(k, tx_ts)                                │
//! │ miss: before DB read         │ next_timestamp()            (load timestamp) │
//! │ miss: after DB read          │ put_from_load(k, v, load_ts, tx_ts, minimal) │
//! │ before DB write              │ lock(k, tx_ts)                               │
//! │ after commit                 │ after_update(k, v, tx_ts, token)             │
//! │ after rollback               │ release(k, token)                            │
//! │ entity removed               │ evict(k) + release(k, token)                 │
//! │ bulk update / native query   │ evict_all()                                  │
//! │ periodic maintenance         │ purge_expired_locks()                        │
//! └──────────────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! [`TxAccess`] wraps the per-transaction half of this table.
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`timestamp`] | [`Timestamp`], [`TimestampSource`], [`LocalTimestamper`], [`ManualClock`] |
//! | [`key`] | [`CacheKey`] for entity rows and collections |
//! | [`entry`] | [`CacheEntry`]: value plus the instant it became valid |
//! | [`store`] | [`DistributedMap`], [`InvalidationStore`], [`LockStore`] and local versions |
//! | [`lock`] | [`SoftLock`] records, [`SoftLockTable`]: in-process lock store |
//! | [`marker`] | [`RegionInvalidationMarker`] |
//! | [`region`] | [`CacheRegion`]: entry storage adapter |
//! | [`strategy`] | [`ReadWriteStrategy`], [`PutOutcome`], [`SkipReason`] |
//! | [`transaction`] | [`TxAccess`] |
//! | [`config`] | [`RegionConfig`] |
//! | [`metrics`] | [`CacheMetrics`], [`RegionMetrics`] |
//!
//! ## Feature Flags
//!
//! - `hashbrown` (default): segment maps use `hashbrown`; without it they use
//!   `std::collections::HashMap`.
//! - `nightly`: enables `hashbrown/nightly`.
//! - `test-hooks`: exposes [`ReadWriteStrategy::set_put_hook`] for deterministic
//!   race tests. Do not enable in production builds.

/// Logical timestamps and the sources that issue them.
pub mod timestamp;

/// Cache key type for entity rows and collections.
pub mod key;

/// Cached value plus validity timestamp.
pub mod entry;

/// Error types.
pub mod error;

/// Distributed substrate traits and in-process implementations.
pub mod store;

/// Per-key soft locks.
///
/// Segmented table of in-flight write intent consulted by every
/// `put_from_load`.
pub mod lock;

/// Region-wide invalidation marker.
pub mod marker;

/// Entry storage adapter over a distributed map.
pub mod region;

/// The read-write concurrency strategy.
pub mod strategy;

/// Transaction-scoped access.
pub mod transaction;

/// Region configuration.
pub mod config;

/// Strategy metrics.
///
/// Deterministically ordered counters shared by every strategy implementation.
pub mod metrics;

pub use config::RegionConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use key::CacheKey;
pub use lock::{HolderIds, LockRecord, LockToken, SoftLock, SoftLockTable};
pub use marker::RegionInvalidationMarker;
pub use metrics::{CacheMetrics, RegionMetrics};
pub use region::CacheRegion;
pub use store::{
    DistributedMap, InvalidationStore, LocalInvalidationStore, LocalMap, LockStore, StoreError,
};
pub use strategy::{PutOutcome, ReadWriteStrategy, SkipReason};
pub use timestamp::{LocalTimestamper, ManualClock, Timestamp, TimestampSource};
pub use transaction::TxAccess;
