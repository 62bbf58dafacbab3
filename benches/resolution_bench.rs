//! Resolution performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeSet;
use varex::*;

fn chain(length: usize) -> VariableSet {
    let mut set = VariableSet::new();
    set.insert(VariableDefinition::literal("v0", 1.0)).unwrap();
    for i in 1..length {
        set.insert(VariableDefinition::expression(
            format!("v{}", i),
            format!("this.v{} + floor({} / 2)", i - 1, i),
        ))
        .unwrap();
    }
    set
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

fn bench_full_resolution(c: &mut Criterion) {
    let rt = runtime();
    let engine_runtime = Runtime::new();
    let mut group = c.benchmark_group("full_resolution");

    for length in [10, 100, 500] {
        let definitions = chain(length);
        group.bench_with_input(BenchmarkId::from_parameter(length), &definitions, |b, definitions| {
            b.iter(|| {
                rt.block_on(Resolver::new(&engine_runtime).resolve_variables(
                    black_box(definitions),
                    ResolvedScope::new(),
                    None,
                    None,
                ))
            })
        });
    }
    group.finish();
}

fn bench_restricted_pass(c: &mut Criterion) {
    let rt = runtime();
    let engine_runtime = Runtime::new();
    let definitions = chain(500);
    let seed = rt
        .block_on(Resolver::new(&engine_runtime).resolve_variables(&definitions, ResolvedScope::new(), None, None))
        .scope;
    let graph = DependencyGraph::build(&definitions, &BTreeSet::new());
    let tail: BTreeSet<String> = ["v450".to_string()].into_iter().collect();
    let recompute = graph.reverse_closure(&tail);

    c.bench_function("restricted_pass_tail_of_500", |b| {
        b.iter(|| {
            rt.block_on(Resolver::new(&engine_runtime).resolve_with_graph(
                &definitions,
                &graph,
                seed.clone(),
                None,
                Some(black_box(&recompute)),
            ))
        })
    });
}

fn bench_graph_build(c: &mut Criterion) {
    let definitions = chain(500);
    c.bench_function("graph_build_500", |b| {
        b.iter(|| DependencyGraph::build(black_box(&definitions), &BTreeSet::new()))
    });
}

criterion_group!(benches, bench_full_resolution, bench_restricted_pass, bench_graph_build);
criterion_main!(benches);
