//! Benchmarks for zone validation and locker address resolution.
//!
//! Resolution runs on every open, and validation on every configuration
//! swap and hardware sync.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench zone_bench
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lockhub_core::zones::{self, Zone, ZoneConfig, ZoneRange};
use std::hint::black_box;

/// Site with `zone_count` zones of 48 lockers, each on its own three cards.
fn site(zone_count: u32) -> ZoneConfig {
    let zones = (0..zone_count)
        .map(|i| {
            let start = i * 48 + 1;
            Zone::new(format!("zone-{i}"), vec![ZoneRange::new(start, start + 47)])
        })
        .collect();
    ZoneConfig::with_zones(zone_count * 48, zones)
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(1));

    let legacy = ZoneConfig::legacy(480);
    group.bench_function("legacy", |b| {
        b.iter(|| zones::resolve(black_box(417), black_box(&legacy)));
    });

    for zone_count in [1u32, 10, 50] {
        let config = site(zone_count);
        let last = config.total_lockers;
        group.bench_with_input(BenchmarkId::new("zoned", zone_count), &config, |b, config| {
            b.iter(|| zones::resolve(black_box(last), black_box(config)));
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");

    for zone_count in [1u32, 10, 50] {
        let config = site(zone_count);
        group.bench_with_input(BenchmarkId::from_parameter(zone_count), &config, |b, config| {
            b.iter(|| zones::validate(black_box(config)));
        });
    }

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let config = site(10);
    let grown = config.total_lockers + 16;

    c.bench_function("sync_with_hardware", |b| {
        b.iter(|| zones::sync_with_hardware(black_box(&config), black_box(grown)));
    });
}

criterion_group!(benches, bench_resolve, bench_validate, bench_sync);
criterion_main!(benches);
