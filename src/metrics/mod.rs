//! Region Metrics
//!
//! Every strategy reports its counters through the [`CacheMetrics`] trait as a
//! `BTreeMap<String, f64>`, so metrics always come out in the same order and can
//! be compared across runs and strategies (the race simulator prints them side by
//! side).
//!
//! The counters themselves live in [`RegionMetrics`]: plain atomics, because the
//! strategy is shared across threads behind `&self` and a metric increment must
//! never take a lock.

use std::collections::BTreeMap;

pub mod region;

pub use region::{RegionMetrics, RegionMetricsSnapshot};

/// Uniform metrics reporting for cache concurrency strategies.
///
/// Keys are sorted alphabetically for consistent output.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// A static string identifying the strategy (e.g. "ReadWrite").
    fn algorithm_name(&self) -> &'static str;
}
