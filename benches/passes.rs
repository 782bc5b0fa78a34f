//! Benchmarks for the deobfuscation passes.
//!
//! Measures the analyses the passes rely on and full engine runs over synthetic obfuscated
//! methods:
//! - Flow graph and liveness construction
//! - Abstract frame computation
//! - Goto inlining over shuffled blocks
//! - The full default pipeline on one method and on a workspace

extern crate bytefold;

use std::{hint::black_box, sync::Arc};

use bytefold::{
    analysis::{ClassHierarchy, FlowGraph, Frames, Liveness, ValueInterpreter},
    assembly::{Condition, MethodBody, MethodBuilder},
    compiler::MethodPass,
    deobfuscation::{
        passes::GotoInliningPass, AnalysisContext, DeobfuscationEngine, EngineConfig,
        MethodContext, Workspace,
    },
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

/// Builds a method of `blocks` shuffled blocks, each guarded by an always-true predicate and
/// padded with constant arithmetic and a dead store.
fn shuffled_method(name: &str, blocks: usize) -> MethodBody {
    let mut builder = MethodBuilder::new("Bench", name, "(I)I").goto("b0");
    // emit odd blocks first, then even ones, so every block is reached by a goto
    let order: Vec<usize> = (0..blocks)
        .filter(|i| i % 2 == 1)
        .chain((0..blocks).filter(|i| i % 2 == 0))
        .collect();
    for i in order {
        let next = if i + 1 == blocks { "end".to_string() } else { format!("b{}", i + 1) };
        let junk = format!("junk{i}");
        builder = builder
            .label(&format!("b{i}"))
            .iconst(i as i32)
            .iconst(3)
            .imul()
            .istore(2)
            .iconst(1)
            .jump(Condition::Ne, &junk)
            .iconst(-1)
            .ireturn()
            .label(&junk)
            .iload(0)
            .iconst(1)
            .iadd()
            .istore(0)
            .goto(&next);
    }
    builder
        .label("end")
        .iload(0)
        .ireturn()
        .build()
        .unwrap()
}

/// Benchmark flow graph and liveness construction.
fn bench_analyses(c: &mut Criterion) {
    let body = shuffled_method("analyses", 64);
    let interpreter = ValueInterpreter::new();

    c.bench_function("flow_graph_64_blocks", |b| {
        b.iter(|| black_box(FlowGraph::build(black_box(&body)).unwrap()));
    });
    c.bench_function("liveness_64_blocks", |b| {
        b.iter(|| black_box(Liveness::compute(black_box(&body)).unwrap()));
    });
    c.bench_function("frames_64_blocks", |b| {
        b.iter(|| black_box(Frames::compute(&interpreter, black_box(&body)).unwrap()));
    });
}

/// Benchmark goto inlining alone.
fn bench_goto_inlining(c: &mut Criterion) {
    let body = shuffled_method("gotos", 64);
    let analysis =
        AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None);

    c.bench_function("goto_inlining_64_blocks", |b| {
        b.iter_batched(
            || body.clone(),
            |body| {
                let mut ctx = MethodContext::new(body, GotoInliningPass::NAME, &analysis);
                GotoInliningPass.run_on_method(&mut ctx).unwrap();
                black_box(ctx.into_body())
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark the full default pipeline on a single method.
fn bench_pipeline_method(c: &mut Criterion) {
    let body = shuffled_method("pipeline", 32);
    let engine = DeobfuscationEngine::default();

    c.bench_function("pipeline_single_method", |b| {
        b.iter_batched(
            || body.clone(),
            |body| black_box(engine.process_method(body).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark the full default pipeline on a workspace, sequential and parallel.
fn bench_pipeline_workspace(c: &mut Criterion) {
    let bodies: Vec<MethodBody> = (0..32)
        .map(|i| shuffled_method(&format!("m{i}"), 16))
        .collect();

    let variants = [
        ("pipeline_workspace_sequential", false),
        ("pipeline_workspace_parallel", true),
    ];
    for (label, parallel) in variants {
        let engine = DeobfuscationEngine::new(EngineConfig::default().with_parallel(parallel));
        c.bench_function(label, |b| {
            b.iter_batched(
                || Workspace::from_bodies(bodies.clone()),
                |workspace| black_box(engine.process(&workspace).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }
}

criterion_group!(
    benches,
    bench_analyses,
    bench_goto_inlining,
    bench_pipeline_method,
    bench_pipeline_workspace
);
criterion_main!(benches);
