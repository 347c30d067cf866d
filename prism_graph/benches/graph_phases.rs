//! Graph Phase Benchmarks
//!
//! # Benchmark Categories
//!
//! 1. **Canonicalization**: folding and value numbering over arithmetic chains
//! 2. **Scheduling**: CFG construction plus placement for each strategy
//! 3. **Pipeline**: the full `compile` entry point
//! 4. **Encoding**: encode and decode of a mid-sized graph

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use prism_graph::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
use prism_graph::ir::LocationIdentity;
use prism_graph::opt::Canonicalizer;
use prism_graph::{
    CompilationContext, CompilerConfig, ControlFlowGraph, Graph, MetaTable, Phase, ScheduleStrategy,
    compile, decode, encode, schedule,
};

// =============================================================================
// Benchmark Helpers
// =============================================================================

fn context() -> CompilationContext {
    let config = CompilerConfig {
        verify_graphs: false,
        ..CompilerConfig::default()
    };
    CompilationContext::new(config, Arc::new(MetaTable::new()))
}

/// A chain of `n` additions mixing constants and a parameter, with
/// duplicated subexpressions for value numbering to find.
fn arithmetic_chain(n: usize) -> Graph {
    let mut b = GraphBuilder::new(1).without_value_numbering();
    let x = b.parameter(0).unwrap();
    let mut acc = x;
    for i in 0..n {
        let k = b.const_int((i % 7) as i64);
        let t = b.int_add(x, k);
        acc = b.int_add(acc, t);
    }
    b.return_value(Some(acc));
    b.finish().unwrap()
}

/// A counting loop whose body reads, computes and writes `n` times.
fn loop_body(n: usize) -> Graph {
    let mut b = GraphBuilder::new(3);
    let limit = b.parameter(0).unwrap();
    let p = b.parameter(1).unwrap();
    let q = b.parameter(2).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let scope = b.loop_begin();
    let i = b.loop_phi(&scope, zero);
    let cond = b.int_lt(i, limit);
    let branch = b.branch(cond);
    b.begin(&branch, true);
    for k in 0..n {
        let slot = LocationIdentity::Named((k % 4) as u32);
        let invariant = b.int_mul(p, q);
        let v = b.read(slot, p, prism_graph::Stamp::INT);
        let sum = b.int_add(v, invariant);
        b.write(slot, p, sum);
    }
    let next = b.int_add(i, one);
    b.loop_end(&scope, &[(i, next)]);
    b.begin(&branch, false);
    b.return_value(Some(i));
    b.finish().unwrap()
}

// =============================================================================
// Canonicalization Benchmarks
// =============================================================================

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    let ctx = context();
    for n in [64usize, 512, 4096] {
        let graph = arithmetic_chain(n);
        group.throughput(Throughput::Elements(graph.node_count() as u64));
        group.bench_with_input(BenchmarkId::new("chain", n), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| {
                    Canonicalizer::new().run(&mut g, &ctx).unwrap();
                    black_box(g)
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// =============================================================================
// Scheduling Benchmarks
// =============================================================================

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    let ctx = context();
    let graph = loop_body(256);
    let cfg = ControlFlowGraph::compute(&graph, &ctx).unwrap();
    for strategy in [
        ScheduleStrategy::Earliest,
        ScheduleStrategy::Latest,
        ScheduleStrategy::LatestOutOfLoops,
    ] {
        group.bench_function(strategy.name(), |b| {
            b.iter(|| black_box(schedule(&graph, &cfg, strategy, &ctx).unwrap()))
        });
    }
    group.bench_function("cfg", |b| {
        b.iter(|| black_box(ControlFlowGraph::compute(&graph, &ctx).unwrap()))
    });
    group.finish();
}

// =============================================================================
// Pipeline Benchmarks
// =============================================================================

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let ctx = context();
    for n in [16usize, 128] {
        let graph = loop_body(n);
        group.bench_with_input(BenchmarkId::new("loop_body", n), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut g| black_box(compile(&mut g, &ctx).unwrap()),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// =============================================================================
// Encoding Benchmarks
// =============================================================================

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    let graph = loop_body(256);
    let encoded = encode(&graph);
    group.throughput(Throughput::Bytes(encoded.bytes().len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(encode(&graph))));
    group.bench_function("decode", |b| b.iter(|| black_box(decode(&encoded).unwrap())));
    group.finish();
}

criterion_group!(
    benches,
    bench_canonicalize,
    bench_schedule,
    bench_compile,
    bench_encoding
);
criterion_main!(benches);
