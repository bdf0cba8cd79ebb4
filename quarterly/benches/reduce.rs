//! Microbenchmarks for quarter consolidation.
//!
//! Measures the field reducers alone and a full condense pass over an
//! in-memory store.
//!
//! Run with: `cargo bench -p quarterly -- reduce`

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use quarterly::reduce::reduce_samples;
use quarterly::sample::{AckMask, RawSample, Reading};
use quarterly::{Consolidator, MemoryAudit, MemoryStore, SampleStore};

/// Builds `count` samples 20 s apart starting at quarter 1.
fn samples(count: usize) -> Vec<RawSample> {
    (0..count)
        .map(|i| RawSample {
            timestamp: 900 + 20 * i as i64,
            reading: Reading {
                temp_f: 60.0 + (i % 7) as f64,
                dewpoint_f: 50.0 + (i % 5) as f64,
                humidity_pct: 40 + (i % 20) as u32,
                pressure_inhg: 30.0 + (i % 3) as f64 * 0.01,
                wind_mph: (i % 12) as u32,
                wind_direction: (i * 37 % 360) as f64,
                rain_day_in: i as f64 * 0.001,
                ..Reading::default()
            },
            ack_mask: AckMask::from_bits((i % 4) as u8),
        })
        .collect()
}

fn bench_reduce_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce/samples_per_quarter");

    for count in [1, 15, 45, 450] {
        let input = samples(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| reduce_samples(black_box(input)));
        });
    }

    group.finish();
}

fn bench_condense_day(c: &mut Criterion) {
    // One day of samples, 20 s apart: 96 quarters.
    let mut seeded = MemoryStore::new();
    for sample in samples(4320) {
        seeded.insert_sample(&sample).unwrap();
    }

    c.bench_function("reduce/condense_one_day", |b| {
        b.iter(|| {
            let mut store = seeded.clone();
            let mut audit = MemoryAudit::new();
            let report = Consolidator::new(&mut store, &mut audit)
                .condense_new()
                .unwrap();
            black_box(report);
        });
    });
}

criterion_group!(benches, bench_reduce_samples, bench_condense_day);
criterion_main!(benches);
