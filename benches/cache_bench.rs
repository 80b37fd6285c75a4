//! Benchmarks for the ephemeral cache and pool accounting.
//!
//! Benchmarks cover:
//! - Cache get/set under a warm key space
//! - Pattern clears
//! - Memoized lookups
//! - Pool checkout/checkin with a monitor attached

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use resilience_core::cache::{EphemeralCache, Memoized};
use resilience_core::config::MonitorConfig;
use resilience_core::core::{PoolLimits, ResourcePool};
use resilience_core::monitor::PoolMonitor;

// ============================================================================
// Cache
// ============================================================================

fn bench_cache_get_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_set");

    for size in [100_u64, 1_000, 10_000] {
        let cache: EphemeralCache<u64> = EphemeralCache::default();
        for i in 0..size {
            cache.set(format!("key:{i}"), i, 300);
        }
        let keys: Vec<String> = (0..size).map(|i| format!("key:{i}")).collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, _| {
            let mut rng = rand::rng();
            b.iter(|| {
                let key = &keys[rng.random_range(0..keys.len())];
                black_box(cache.get(key))
            });
        });
        group.bench_with_input(BenchmarkId::new("set", size), &size, |b, &size| {
            let mut rng = rand::rng();
            b.iter(|| {
                let i = rng.random_range(0..size);
                cache.set(format!("key:{i}"), black_box(i), 300);
            });
        });
    }

    group.finish();
}

fn bench_cache_clear_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_clear_pattern");

    for size in [100_usize, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let cache: EphemeralCache<usize> = EphemeralCache::default();
                    for i in 0..size {
                        let prefix = if i % 2 == 0 { "campaigns" } else { "users" };
                        cache.set(format!("{prefix}:{i}"), i, 300);
                    }
                    cache
                },
                |cache| black_box(cache.clear(Some("campaigns:*")).unwrap_or(0)),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_memoized_hit(c: &mut Criterion) {
    let cache = Arc::new(EphemeralCache::default());
    let memo = Memoized::new(Arc::clone(&cache), "bench", 300, |n: &u64| n.wrapping_mul(31));
    memo.call(&42);

    c.bench_function("memoized_hit", |b| b.iter(|| black_box(memo.call(black_box(&42)))));
}

// ============================================================================
// Pool
// ============================================================================

fn bench_pool_checkout_monitored(c: &mut Criterion) {
    let pool = Arc::new(ResourcePool::new(
        PoolLimits {
            pool_size: 8,
            max_overflow: 8,
            checkout_timeout: Duration::from_secs(1),
        },
        || Ok(0_u64),
    ));
    let monitor = PoolMonitor::new(&MonitorConfig {
        background: false,
        ..MonitorConfig::default()
    });
    monitor.attach_pool(pool.clone());

    c.bench_function("pool_checkout_checkin_monitored", |b| {
        b.iter(|| {
            let conn = pool.checkout().ok();
            black_box(conn.as_deref().copied())
        });
    });
    black_box(monitor.get_metrics());
}

criterion_group!(
    benches,
    bench_cache_get_set,
    bench_cache_clear_pattern,
    bench_memoized_hit,
    bench_pool_checkout_monitored
);
criterion_main!(benches);
