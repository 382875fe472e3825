//! Benchmarks for graph building, cycle detection and planning.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use etlgraph::graph::{CycleDetector, GraphBuilder};
use etlgraph::pipeline::DependencyPipeline;
use etlgraph::planner::ExecutionPlanner;
use etlgraph::testing::fixtures;

fn build_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for width in [10, 50] {
        let units = fixtures::layered(10, width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &units, |b, units| {
            b.iter(|| GraphBuilder::new().units(units.iter().cloned()).build());
        });
    }
    group.finish();
}

fn detect_benchmark(c: &mut Criterion) {
    let graph = GraphBuilder::new()
        .units(fixtures::ring(10))
        .build()
        .unwrap_or_default();
    let detector = CycleDetector::default();
    c.bench_function("detect_ring_10", |b| {
        b.iter(|| detector.detect(black_box(&graph)));
    });
}

fn plan_benchmark(c: &mut Criterion) {
    let graph = GraphBuilder::new()
        .units(fixtures::layered(20, 25))
        .build()
        .unwrap_or_default();
    let planner = ExecutionPlanner::new();
    c.bench_function("plan_layered_20x25", |b| {
        b.iter(|| planner.plan(black_box(&graph)));
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let mut units = fixtures::layered(10, 10);
    units.extend(fixtures::lookup_cycle());
    let pipeline = DependencyPipeline::default();
    c.bench_function("run_layered_with_cycle", |b| {
        b.iter(|| pipeline.run(black_box(&units)));
    });
}

criterion_group!(
    benches,
    build_benchmark,
    detect_benchmark,
    plan_benchmark,
    pipeline_benchmark
);
criterion_main!(benches);
