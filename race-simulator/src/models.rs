// Data models for race simulation

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Cache strategies that can be driven by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    /// Soft locks, timestamp ordering and the region invalidation marker
    ReadWrite,
    /// Lock records share the entry map and are wiped by `evict_all`
    Naive,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ReadWrite => "read-write",
            StrategyKind::Naive => "naive",
        }
    }

    /// Get all available strategies
    pub fn all() -> Vec<StrategyKind> {
        vec![StrategyKind::ReadWrite, StrategyKind::Naive]
    }

    /// Parse a strategy name, accepting a few aliases
    pub fn parse(name: &str) -> Option<StrategyKind> {
        match name.to_lowercase().as_str() {
            "read-write" | "readwrite" | "rw" => Some(StrategyKind::ReadWrite),
            "naive" => Some(StrategyKind::Naive),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of distinct keys the workload touches
    pub keys: u64,
    /// Number of writer threads
    pub writers: usize,
    /// Number of loader threads
    pub loaders: usize,
    /// Operations performed by each thread
    pub ops: usize,
    /// Each writer calls `evict_all` after every N-th commit (0 disables)
    pub evict_all_every: usize,
    /// Upper bound for the delay a loader sleeps between its read and its put
    pub max_load_delay: Duration,
    /// Seed for the per-thread random generators
    pub seed: u64,
    /// Strategies to run, one after another, on identical workloads
    pub strategies: Vec<StrategyKind>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            keys: 16,
            writers: 4,
            loaders: 8,
            ops: 2_000,
            evict_all_every: 50,
            max_load_delay: Duration::from_micros(200),
            seed: 42,
            strategies: StrategyKind::all(),
        }
    }
}

/// Outcome of running one strategy
#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub strategy: StrategyKind,
    /// Keys whose cached value differs from the database row
    pub stale_entries: u64,
    /// Keys whose cached value matches the database row
    pub fresh_entries: u64,
    /// Keys with nothing cached
    pub absent_entries: u64,
    /// Committed database writes
    pub writes: u64,
    /// Loads that ended in a `put_from_load` call
    pub loads: u64,
    /// Loads the strategy accepted into the cache
    pub loads_cached: u64,
    /// `evict_all` calls issued
    pub evict_alls: u64,
    /// Wall-clock time of the workload phase
    pub duration: Duration,
    /// Strategy-specific counters
    pub metrics: BTreeMap<String, f64>,
}

impl StrategyReport {
    /// Fraction of keys that ended the run with a stale cached value, as a percentage
    pub fn stale_rate(&self) -> f64 {
        let total = self.stale_entries + self.fresh_entries + self.absent_entries;
        if total > 0 {
            (self.stale_entries as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Results of a simulation run
#[derive(Debug)]
pub struct SimulationResult {
    pub reports: Vec<StrategyReport>,
    pub duration: Duration,
}

/// CSV export row for simulation results
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub strategy: String,
    pub keys: u64,
    pub writers: usize,
    pub loaders: usize,
    pub ops: usize,
    pub evict_all_every: usize,
    pub seed: u64,
    pub stale_entries: u64,
    pub fresh_entries: u64,
    pub absent_entries: u64,
    pub stale_rate: f64,
    pub writes: u64,
    pub loads: u64,
    pub loads_cached: u64,
    pub evict_alls: u64,
    pub duration_ms: u64,
}

impl CsvResultRow {
    pub fn new(config: &SimulationConfig, report: &StrategyReport) -> Self {
        Self {
            strategy: report.strategy.as_str().to_string(),
            keys: config.keys,
            writers: config.writers,
            loaders: config.loaders,
            ops: config.ops,
            evict_all_every: config.evict_all_every,
            seed: config.seed,
            stale_entries: report.stale_entries,
            fresh_entries: report.fresh_entries,
            absent_entries: report.absent_entries,
            stale_rate: report.stale_rate(),
            writes: report.writes,
            loads: report.loads,
            loads_cached: report.loads_cached,
            evict_alls: report.evict_alls,
            duration_ms: report.duration.as_millis() as u64,
        }
    }
}
