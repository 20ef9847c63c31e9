use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parachain_analytics::prelude::*;
use std::hint::black_box;

/// Benchmark suite for the analytic core: feature derivation and model
/// training over synthetic daily series.

fn synthetic_series(n: usize) -> MetricSeries {
    let base = Utc::now() - Duration::days(n as i64);
    let points = (0..n)
        .map(|i| {
            MetricPoint::new(
                base + Duration::days(i as i64),
                1000.0 + 5.0 * i as f64 + (i as f64 * 0.43).sin() * 40.0,
            )
        })
        .collect();
    MetricSeries::new("moonbeam", "tvl", points)
}

fn benchmark_feature_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_derivation");

    for &size in &[100, 1000, 5000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("derive", size), &size, |b, &size| {
            let series = synthetic_series(size);
            let pipeline = FeaturePipeline::new();
            b.iter(|| black_box(pipeline.derive(&series, FillMethod::Forward).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_forecast_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("forecast_training");
    group.sample_size(10);

    let series = synthetic_series(400);
    let table = FeaturePipeline::new()
        .derive(&series, FillMethod::Forward)
        .unwrap();

    for kind in [ModelKind::Linear, ModelKind::GradientBoosted] {
        group.bench_with_input(
            BenchmarkId::new("train", kind.as_str()),
            &kind,
            |b, &kind| {
                let dir = tempfile::tempdir().unwrap();
                let manager = ForecastModelManager::new(dir.path()).unwrap();
                b.iter(|| black_box(manager.train(&table, "moonbeam", "tvl", kind).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_feature_derivation,
    benchmark_forecast_training
);
criterion_main!(benches);
