//! Simulation runner for cache strategies
//!
//! Each strategy gets a fresh cache and a fresh database and is driven by the
//! same seeded workload:
//!
//! - writers pick a key, take the cache lock, bump the database row and
//!   publish the new version through `after_update`
//! - loaders pick a key, take a load timestamp, read the row, sleep a random
//!   short delay and then offer the row through `put_from_load`
//! - every `evict_all_every` commits a writer invalidates the whole region
//!
//! After every thread has joined, each key's cached value is compared with its
//! database row. A correct strategy never ends a run with a stale entry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rw_cache::metrics::CacheMetrics;
use rw_cache::{ReadWriteStrategy, RegionConfig, Timestamp};
use tracing::{debug, info};

use crate::models::{SimulationConfig, SimulationResult, StrategyKind, StrategyReport};
use crate::naive::NaiveStrategy;

/// Authoritative store: one version counter per key.
#[derive(Debug)]
pub struct Database {
    rows: Vec<Mutex<u64>>,
    versions: AtomicU64,
}

impl Database {
    pub fn new(keys: u64) -> Self {
        Self {
            rows: (0..keys).map(|_| Mutex::new(0)).collect(),
            versions: AtomicU64::new(0),
        }
    }

    pub fn read(&self, key: u64) -> u64 {
        *self.rows[key as usize].lock()
    }

    /// Stores a fresh, globally unique version for `key` and returns it.
    pub fn write(&self, key: u64) -> u64 {
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        *self.rows[key as usize].lock() = version;
        version
    }

    pub fn keys(&self) -> u64 {
        self.rows.len() as u64
    }
}

/// The operations the workload needs from a cache strategy.
pub trait RaceTarget: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn timestamp(&self) -> Timestamp;

    fn cached(&self, key: u64) -> rw_cache::Result<Option<u64>>;

    /// Offers a loaded row. Returns whether it was cached.
    fn load(&self, key: u64, row: u64, load_timestamp: Timestamp) -> rw_cache::Result<bool>;

    /// Runs one write of `key` to `db` under the strategy's write protocol.
    fn write(&self, key: u64, db: &Database) -> rw_cache::Result<()>;

    fn evict_all(&self) -> rw_cache::Result<()>;

    fn metrics(&self) -> BTreeMap<String, f64>;
}

impl RaceTarget for ReadWriteStrategy<u64, u64> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReadWrite
    }

    fn timestamp(&self) -> Timestamp {
        self.next_timestamp()
    }

    fn cached(&self, key: u64) -> rw_cache::Result<Option<u64>> {
        self.get(&key, self.next_timestamp())
    }

    fn load(&self, key: u64, row: u64, load_timestamp: Timestamp) -> rw_cache::Result<bool> {
        let outcome = self.put_from_load(key, row, load_timestamp, load_timestamp, false)?;
        Ok(outcome.is_stored())
    }

    fn write(&self, key: u64, db: &Database) -> rw_cache::Result<()> {
        let tx_timestamp = self.next_timestamp();
        let token = self.lock(key, tx_timestamp)?;
        let version = db.write(key);
        self.after_update(key, version, tx_timestamp, token)
    }

    fn evict_all(&self) -> rw_cache::Result<()> {
        ReadWriteStrategy::evict_all(self).map(|_| ())
    }

    fn metrics(&self) -> BTreeMap<String, f64> {
        CacheMetrics::metrics(self)
    }
}

impl RaceTarget for NaiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
    }

    fn timestamp(&self) -> Timestamp {
        self.next_timestamp()
    }

    fn cached(&self, key: u64) -> rw_cache::Result<Option<u64>> {
        Ok(self.get(key))
    }

    fn load(&self, key: u64, row: u64, load_timestamp: Timestamp) -> rw_cache::Result<bool> {
        Ok(self.put_from_load(key, row, load_timestamp))
    }

    fn write(&self, key: u64, db: &Database) -> rw_cache::Result<()> {
        let tx_timestamp = self.next_timestamp();
        self.lock(key);
        let version = db.write(key);
        self.after_update(key, version, tx_timestamp);
        Ok(())
    }

    fn evict_all(&self) -> rw_cache::Result<()> {
        NaiveStrategy::evict_all(self);
        Ok(())
    }

    fn metrics(&self) -> BTreeMap<String, f64> {
        NaiveStrategy::metrics(self)
    }
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    loads: AtomicU64,
    loads_cached: AtomicU64,
    evict_alls: AtomicU64,
}

/// Runs the configured workload against each selected strategy
pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run every selected strategy in turn
    pub fn run(&self) -> Result<SimulationResult, Box<dyn std::error::Error>> {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(self.config.strategies.len());

        for &kind in &self.config.strategies {
            let target: Arc<dyn RaceTarget> = match kind {
                StrategyKind::ReadWrite => Arc::new(ReadWriteStrategy::<u64, u64>::local(
                    RegionConfig::named("race-simulator"),
                )?),
                StrategyKind::Naive => Arc::new(NaiveStrategy::new()),
            };
            info!(strategy = %kind, "running workload");
            reports.push(self.run_strategy(target)?);
        }

        Ok(SimulationResult {
            reports,
            duration: start.elapsed(),
        })
    }

    /// Drive one strategy through the workload and audit the result
    pub fn run_strategy(
        &self,
        target: Arc<dyn RaceTarget>,
    ) -> Result<StrategyReport, Box<dyn std::error::Error>> {
        let keys = self.config.keys.max(1);
        let db = Arc::new(Database::new(keys));
        let counters = Arc::new(Counters::default());
        let start = Instant::now();

        let mut handles = Vec::with_capacity(self.config.writers + self.config.loaders);
        for w in 0..self.config.writers {
            let target = Arc::clone(&target);
            let db = Arc::clone(&db);
            let counters = Arc::clone(&counters);
            let ops = self.config.ops;
            let evict_all_every = self.config.evict_all_every;
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(w as u64));
            handles.push(thread::spawn(move || -> rw_cache::Result<()> {
                for i in 1..=ops {
                    let key = rng.gen_range(0..keys);
                    target.write(key, &db)?;
                    counters.writes.fetch_add(1, Ordering::Relaxed);
                    if evict_all_every > 0 && i % evict_all_every == 0 {
                        target.evict_all()?;
                        counters.evict_alls.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(())
            }));
        }

        let max_delay = self.config.max_load_delay;
        for l in 0..self.config.loaders {
            let target = Arc::clone(&target);
            let db = Arc::clone(&db);
            let counters = Arc::clone(&counters);
            let ops = self.config.ops;
            let seed = self
                .config
                .seed
                .wrapping_add((self.config.writers + l) as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            handles.push(thread::spawn(move || -> rw_cache::Result<()> {
                for _ in 0..ops {
                    let key = rng.gen_range(0..keys);
                    if target.cached(key)?.is_some() {
                        continue;
                    }
                    let load_timestamp = target.timestamp();
                    let row = db.read(key);
                    let delay = random_delay(&mut rng, max_delay);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    counters.loads.fetch_add(1, Ordering::Relaxed);
                    if target.load(key, row, load_timestamp)? {
                        counters.loads_cached.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(())
            }));
        }

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err("workload thread panicked".into()),
            }
        }
        let duration = start.elapsed();

        let mut report = StrategyReport {
            strategy: target.kind(),
            stale_entries: 0,
            fresh_entries: 0,
            absent_entries: 0,
            writes: counters.writes.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            loads_cached: counters.loads_cached.load(Ordering::Relaxed),
            evict_alls: counters.evict_alls.load(Ordering::Relaxed),
            duration,
            metrics: target.metrics(),
        };
        audit(target.as_ref(), &db, &mut report)?;
        Ok(report)
    }
}

fn random_delay(rng: &mut StdRng, max: Duration) -> Duration {
    let max_micros = max.as_micros() as u64;
    if max_micros == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(rng.gen_range(0..=max_micros))
    }
}

/// Compare every cached value with the database once the workload is quiet.
fn audit(
    target: &dyn RaceTarget,
    db: &Database,
    report: &mut StrategyReport,
) -> rw_cache::Result<()> {
    for key in 0..db.keys() {
        match target.cached(key)? {
            None => report.absent_entries += 1,
            Some(cached) if cached == db.read(key) => report.fresh_entries += 1,
            Some(cached) => {
                debug!(key, cached, row = db.read(key), "stale entry");
                report.stale_entries += 1;
            }
        }
    }
    Ok(())
}
