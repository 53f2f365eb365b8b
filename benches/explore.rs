#![allow(unused)]
extern crate pathscope;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pathscope::prelude::*;
use std::hint::black_box;

/// `int count(int end) { int a = 0; for (int i = 0; i < end; i++) a += i; return a; }`
fn counting_loop() -> Project {
    let mut f = FunctionBuilder::new("count", vec![Param::new("end", Type::i32())], Type::i32());
    let entry = f.block("entry");
    let header = f.block("header");
    let body = f.block("body");
    let exit = f.block("exit");
    f.br(header);
    f.position_at(header);
    let i = f.phi(vec![(entry, Operand::i32(0))]);
    let a = f.phi(vec![(entry, Operand::i32(0))]);
    let more = f.compare(CompareOp::Lt, i.clone(), f.param(0));
    f.cond_br(more, body, exit);
    f.position_at(body);
    let a1 = f.binary(BinaryOp::Add, a.clone(), i.clone());
    let i1 = f.binary(BinaryOp::Add, i.clone(), Operand::i32(1));
    f.add_incoming(&a, body, a1);
    f.add_incoming(&i, body, i1);
    f.br(header);
    f.position_at(exit);
    f.ret(a);
    let function = f.finish().expect("valid function");
    Project::link(vec![ModuleBuilder::new("bench").function(function).build()])
        .expect("links")
}

/// Full exploration of a loop with a symbolic trip count, for several loop bounds.
fn bench_loop_exploration(c: &mut Criterion) {
    let project = counting_loop();
    let mut group = c.benchmark_group("explore_loop");
    for bound in [4u32, 16, 64] {
        group.bench_with_input(BenchmarkId::new("sequential", bound), &bound, |b, &bound| {
            let explorer = Explorer::with_config(
                &project,
                ExplorationConfig::default().with_loop_bound(bound),
            );
            b.iter(|| {
                let report = explorer.explore(black_box(&Query::new("count"))).unwrap();
                black_box(report)
            });
        });
        group.bench_with_input(BenchmarkId::new("parallel", bound), &bound, |b, &bound| {
            let explorer = Explorer::with_config(
                &project,
                ExplorationConfig::default()
                    .with_loop_bound(bound)
                    .with_parallel(true),
            );
            b.iter(|| {
                let report = explorer.explore(black_box(&Query::new("count"))).unwrap();
                black_box(report)
            });
        });
    }
    group.finish();
}

/// Target search: the first path whose sum is 45 (end == 10).
fn bench_find_target(c: &mut Criterion) {
    let project = counting_loop();
    let explorer = Explorer::with_config(&project, ExplorationConfig::default().with_loop_bound(16));
    c.bench_function("find_sum_45", |b| {
        b.iter(|| {
            let query = Query::new("count").target(Target::Returns(45));
            let report = explorer.explore(black_box(&query)).unwrap();
            black_box(report.witness)
        });
    });
}

criterion_group!(benches, bench_loop_exploration, bench_find_target);
criterion_main!(benches);
