//! Recursive union benchmarks
//!
//! Counts 1..N through a recursive union, in memory and with spilling
//! working tables, in both union modes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use motedb_recursive::query::{Expr, ProjectItem, UnionMode};
use motedb_recursive::types::{ColumnType, Schema, Value};
use motedb_recursive::{ExecutionEngine, ExecutionPlan, ExecutorConfig, QueryPlanner, WorkTableConfig};

/// seed `width` rows of 1, recursive `n + 1 WHERE n < depth`
fn counter_plan(mode: UnionMode, width: usize, depth: i64) -> ExecutionPlan {
    let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
    let seed = (0..width).map(|_| vec![Value::Integer(1)]).collect();
    QueryPlanner::new()
        .plan_recursive_union(schema.clone(), mode, ExecutionPlan::values(schema, seed), |_, wt| {
            Ok(wt.scan_with(
                Some(Expr::col(0).lt(Expr::lit(depth))),
                Some(vec![ProjectItem::new(Expr::col(0).add(Expr::lit(1)), "n")]),
            ))
        })
        .expect("valid plan")
}

fn bench_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_depth");
    let engine = ExecutionEngine::new();

    for depth in [100i64, 1_000, 10_000] {
        let plan = counter_plan(UnionMode::All, 1, depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("all", depth), &plan, |b, plan| {
            b.iter(|| black_box(engine.execute(plan).expect("execute").len()))
        });
    }
    group.finish();
}

fn bench_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_width");
    let engine = ExecutionEngine::new();

    for width in [10usize, 100, 1_000] {
        for mode in [UnionMode::All, UnionMode::Distinct] {
            let plan = counter_plan(mode, width, 50);
            let id = format!("{:?}", mode).to_lowercase();
            group.throughput(Throughput::Elements((width * 50) as u64));
            group.bench_with_input(BenchmarkId::new(id, width), &plan, |b, plan| {
                b.iter(|| black_box(engine.execute(plan).expect("execute").len()))
            });
        }
    }
    group.finish();
}

fn bench_spill(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_spill");
    group.sample_size(20);
    let plan = counter_plan(UnionMode::All, 1_000, 20);

    for (name, work_table) in [
        ("in_memory", WorkTableConfig::default()),
        ("spill_snappy", WorkTableConfig::for_low_memory()),
        (
            "spill_raw",
            WorkTableConfig {
                spill_compression: false,
                ..WorkTableConfig::for_low_memory()
            },
        ),
    ] {
        let config = ExecutorConfig {
            work_table,
            ..ExecutorConfig::default()
        };
        let engine = ExecutionEngine::with_config(config).expect("config");
        group.bench_function(name, |b| {
            b.iter(|| black_box(engine.execute(&plan).expect("execute").len()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_depth, bench_width, bench_spill);
criterion_main!(benches);
