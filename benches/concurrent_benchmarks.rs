//! Concurrent Strategy Benchmarks
//!
//! Benchmarks for measuring the read-write strategy under concurrent access
//! across different workloads and segment configurations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rw_cache::{ReadWriteStrategy, RegionConfig};
use std::sync::Arc;
use std::thread;

const KEYS: usize = 10_000;
const OPS_PER_THREAD: usize = 1_000;
const THREADS: usize = 8;

fn make_cache(segments: usize) -> Arc<ReadWriteStrategy<usize, usize>> {
    let cache = ReadWriteStrategy::local(RegionConfig {
        segments,
        ..RegionConfig::named("bench")
    })
    .unwrap();
    for key in 0..KEYS {
        let load_ts = cache.next_timestamp();
        cache.put_from_load(key, key, load_ts, load_ts, false).unwrap();
    }
    Arc::new(cache)
}

/// Benchmark lock-free reads
fn concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Reads");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = make_cache(16);
    group.bench_function("ReadWrite", |b| {
        b.iter(|| run_concurrent_reads(Arc::clone(&cache), THREADS, OPS_PER_THREAD));
    });

    group.finish();
}

/// Benchmark lock → after_update cycles
fn concurrent_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Writes");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = make_cache(16);
    group.bench_function("ReadWrite", |b| {
        b.iter(|| run_concurrent_writes(Arc::clone(&cache), THREADS, OPS_PER_THREAD));
    });

    group.finish();
}

/// Benchmark a read-mostly mix with loads and writes
fn concurrent_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Mixed");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = make_cache(16);
    group.bench_function("ReadWrite", |b| {
        b.iter(|| run_concurrent_mixed(Arc::clone(&cache), THREADS, OPS_PER_THREAD));
    });

    group.finish();
}

/// Compare segment counts on the mixed workload
fn segment_count_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Segment Count");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for segments in [1, 4, 16, 64] {
        let cache = make_cache(segments);
        group.bench_with_input(BenchmarkId::from_parameter(segments), &segments, |b, _| {
            b.iter(|| run_concurrent_mixed(Arc::clone(&cache), THREADS, OPS_PER_THREAD));
        });
    }

    group.finish();
}

fn run_concurrent_reads(
    cache: Arc<ReadWriteStrategy<usize, usize>>,
    num_threads: usize,
    ops_per_thread: usize,
) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            let tx_ts = cache.next_timestamp();
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i) % KEYS;
                black_box(cache.get(&key, tx_ts).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn run_concurrent_writes(
    cache: Arc<ReadWriteStrategy<usize, usize>>,
    num_threads: usize,
    ops_per_thread: usize,
) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i) % KEYS;
                let tx_ts = cache.next_timestamp();
                let token = cache.lock(key, tx_ts).unwrap();
                cache.after_update(key, i, tx_ts, token).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn run_concurrent_mixed(
    cache: Arc<ReadWriteStrategy<usize, usize>>,
    num_threads: usize,
    ops_per_thread: usize,
) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i) % KEYS;
                let ts = cache.next_timestamp();
                match i % 10 {
                    0 => {
                        let token = cache.lock(key, ts).unwrap();
                        cache.after_update(key, i, ts, token).unwrap();
                    }
                    1 | 2 => {
                        black_box(cache.put_from_load(key, key, ts, ts, true).unwrap());
                    }
                    _ => {
                        black_box(cache.get(&key, ts).unwrap());
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

criterion_group!(
    benches,
    concurrent_reads,
    concurrent_writes,
    concurrent_mixed,
    segment_count_comparison
);
criterion_main!(benches);
