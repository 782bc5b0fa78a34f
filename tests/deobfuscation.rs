//! End-to-end pipeline tests.
//!
//! Every test builds a method with `MethodBuilder`, runs it through the engine (or a single
//! pass) and checks the exact instruction sequence or a structural property of the result.

use std::sync::Arc;

use bytefold::{
    analysis::{AbstractValue, ClassHierarchy, Evaluator, FlowGraph, Liveness, ValueInterpreter},
    assembly::{Condition, Insn, InvokeKind, MethodBody, MethodBuilder},
    compiler::{EventKind, MethodPass, PassScheduler},
    deobfuscation::{
        passes::{
            default_registry, ConstantFoldingPass, DeadCodePass, GotoInliningPass,
            OpaquePredicatePass, RedundantTryCatchPass, VariableFoldingPass,
        },
        AnalysisContext, DeobfuscationEngine, EngineConfig, MethodContext, Workspace,
    },
    Error, Result,
};

const ARITHMETIC: &str = "java/lang/ArithmeticException";

/// Real instructions of `body`, with jump targets elided.
fn code(body: &MethodBody) -> Vec<String> {
    body.instructions
        .iter()
        .filter(|(_, insn)| !insn.is_meta())
        .map(|(_, insn)| match insn {
            Insn::Goto(_) => "goto".to_string(),
            Insn::If(..) => "if".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn deobfuscate(body: MethodBody) -> MethodBody {
    let (body, result) = DeobfuscationEngine::default().process_method(body).unwrap();
    assert!(result.is_clean(), "{}", result.detailed_summary());
    body.verify().unwrap();
    body
}

fn analysis() -> AnalysisContext {
    AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None)
}

#[test]
fn test_constant_addition() {
    let body = MethodBuilder::new("Demo", "a", "()I")
        .iconst(2)
        .iconst(3)
        .iadd()
        .ireturn()
        .build()
        .unwrap();
    assert_eq!(code(&deobfuscate(body)), ["iconst_5", "ireturn"]);
}

#[test]
fn test_goto_over_junk() {
    let body = MethodBuilder::new("Demo", "b", "()V")
        .goto("l")
        .iconst(1)
        .pop()
        .label("l")
        .vreturn()
        .build()
        .unwrap();
    assert_eq!(code(&deobfuscate(body)), ["return"]);
}

#[test]
fn test_opaque_branch_on_zero() {
    let body = MethodBuilder::new("Demo", "c", "()I")
        .iconst(0)
        .jump(Condition::Eq, "taken")
        .iconst(1)
        .ireturn()
        .label("taken")
        .iconst(2)
        .ireturn()
        .build()
        .unwrap();
    let (body, result) = DeobfuscationEngine::default().process_method(body).unwrap();
    assert_eq!(code(&body), ["iconst_2", "ireturn"]);
    assert!(result.events.has(EventKind::OpaquePredicateRemoved));
    assert!(result.events.has(EventKind::DeadCodeRemoved));
}

#[test]
fn test_dead_store_of_constant() {
    let body = MethodBuilder::new("Demo", "d", "()I")
        .iconst(7)
        .istore(1)
        .iconst(0)
        .ireturn()
        .build()
        .unwrap();
    assert_eq!(code(&deobfuscate(body)), ["iconst_0", "ireturn"]);
}

#[test]
fn test_dead_store_of_call_result() {
    let body = MethodBuilder::new("Demo", "d", "()I")
        .invokestatic("Demo", "sideEffect", "()I")
        .istore(1)
        .iconst(0)
        .ireturn()
        .build()
        .unwrap();
    assert_eq!(
        code(&deobfuscate(body)),
        ["invokestatic Demo.sideEffect()I", "pop", "iconst_0", "ireturn"]
    );
}

#[test]
fn test_arithmetic_range_without_division() {
    let body = MethodBuilder::new("Demo", "e", "(I)I")
        .label("start")
        .iload(0)
        .iconst(1)
        .iadd()
        .label("end")
        .ireturn()
        .label("handler")
        .pop()
        .iconst(-1)
        .ireturn()
        .try_catch("start", "end", "handler", Some(ARITHMETIC))
        .build()
        .unwrap();
    let (body, result) = DeobfuscationEngine::default().process_method(body).unwrap();
    assert!(body.try_catch_blocks.is_empty());
    assert_eq!(code(&body), ["iload 0", "iconst_1", "iadd", "ireturn"]);
    assert!(result.events.has(EventKind::TryCatchRemoved));
}

#[test]
fn test_arithmetic_range_with_division_is_kept() {
    let body = MethodBuilder::new("Demo", "e", "(II)I")
        .label("start")
        .iload(0)
        .iload(1)
        .idiv()
        .label("end")
        .ireturn()
        .label("handler")
        .pop()
        .iconst(-1)
        .ireturn()
        .try_catch("start", "end", "handler", Some(ARITHMETIC))
        .build()
        .unwrap();
    let body = deobfuscate(body);
    assert_eq!(body.try_catch_blocks.len(), 1);
    assert_eq!(code(&body).last().map(String::as_str), Some("ireturn"));
    assert_eq!(code(&body).len(), 7);
}

/// A method mixing several obfuscations, used by the structural tests.
fn obfuscated() -> MethodBody {
    MethodBuilder::new("Demo", "mixed", "(I)I")
        .goto("entry")
        .label("junk")
        .iconst(9)
        .pop()
        .goto("junk")
        .label("exit")
        .iload(1)
        .ireturn()
        .label("entry")
        .iconst(3)
        .iconst(4)
        .imul()
        .istore(2)
        .iconst(1)
        .jump(Condition::Ne, "real")
        .iconst(0)
        .ireturn()
        .label("real")
        .iload(0)
        .istore(1)
        .goto("exit")
        .label("dead_handler")
        .athrow()
        .try_catch("junk", "exit", "dead_handler", Some(ARITHMETIC))
        .build()
        .unwrap()
}

#[test]
fn test_mixed_obfuscation() {
    let body = deobfuscate(obfuscated());
    assert_eq!(code(&body), ["iload 0", "ireturn"]);
    assert!(body.try_catch_blocks.is_empty());
}

#[test]
fn test_every_remaining_instruction_is_reachable() {
    let body = deobfuscate(obfuscated());
    let graph = FlowGraph::build(&body).unwrap();
    let reachable = graph.reachable();
    for (pos, id) in graph.positions().order().iter().enumerate() {
        let insn = body.instructions.get(*id).unwrap();
        if !insn.is_meta() {
            assert!(reachable.contains(pos), "{insn} at {pos} is unreachable");
        }
    }
}

#[test]
fn test_passes_reach_their_fixed_point() {
    let analysis = analysis();
    let passes: Vec<Box<dyn MethodPass>> = vec![
        Box::new(DeadCodePass::new()),
        Box::new(GotoInliningPass::new()),
        Box::new(VariableFoldingPass::new()),
        Box::new(ConstantFoldingPass::new()),
        Box::new(OpaquePredicatePass::new()),
        Box::new(RedundantTryCatchPass::new()),
    ];
    for pass in &passes {
        let mut ctx = MethodContext::new(obfuscated(), pass.name(), &analysis);
        pass.run_on_method(&mut ctx).unwrap();
        assert!(
            !pass.run_on_method(&mut ctx).unwrap(),
            "{} changed the body on its second run",
            pass.name()
        );
    }
}

#[test]
fn test_second_engine_run_changes_nothing() {
    let body = deobfuscate(obfuscated());
    let before = code(&body);
    let (body, result) = DeobfuscationEngine::default().process_method(body).unwrap();
    assert_eq!(code(&body), before);
    assert_eq!(result.events.transformation_count(), 0);
    assert!(result.changed_methods.is_empty());
}

#[test]
fn test_liveness_equations_hold() {
    let body = MethodBuilder::new("Demo", "loop", "(I)I")
        .iconst(0)
        .istore(1)
        .label("head")
        .iload(0)
        .jump(Condition::Le, "done")
        .iload(1)
        .iload(0)
        .iadd()
        .istore(1)
        .iinc(0, -1)
        .goto("head")
        .label("done")
        .iload(1)
        .ireturn()
        .build()
        .unwrap();
    let liveness = Liveness::compute(&body).unwrap();
    let graph = liveness.graph();
    let slots = usize::from(body.max_locals);

    for pos in 0..graph.len() {
        let live_out = liveness.live_out(pos).unwrap();
        for slot in 0..slots {
            let from_successors = graph
                .successors(pos)
                .any(|s| liveness.live_in(s).unwrap().contains(slot));
            assert_eq!(live_out.contains(slot), from_successors, "OUT[{pos}] slot {slot}");
        }

        let live_in = liveness.live_in(pos).unwrap();
        let id = graph.positions().at(pos).unwrap();
        match body.instructions.get(id).unwrap() {
            Insn::Load(_, slot) | Insn::Iinc { slot, .. } => {
                assert!(live_in.contains(usize::from(*slot)));
            }
            Insn::Store(_, slot) => {
                assert!(!live_in.contains(usize::from(*slot)));
            }
            _ => {
                for slot in 0..slots {
                    assert_eq!(live_in.contains(slot), live_out.contains(slot));
                }
            }
        }
    }
    // the accumulator is read before any write only on the exit path
    assert!(!liveness.live_in(0).unwrap().contains(1));
}

#[test]
fn test_goto_inlining_preserves_results() {
    let body = MethodBuilder::new("Demo", "shuffled", "(I)I")
        .goto("check")
        .label("small")
        .iload(0)
        .iconst(10)
        .iadd()
        .ireturn()
        .label("large")
        .iload(0)
        .iconst(3)
        .imul()
        .goto("out")
        .label("check")
        .iload(0)
        .iconst(5)
        .jump(Condition::ICmpLt, "small")
        .goto("large")
        .label("out")
        .ireturn()
        .build()
        .unwrap();

    let analysis = analysis();
    let mut ctx = MethodContext::new(body.clone(), GotoInliningPass::NAME, &analysis);
    assert!(GotoInliningPass.run_on_method(&mut ctx).unwrap());
    let inlined = ctx.into_body();
    inlined.verify().unwrap();
    assert!(code(&inlined).iter().filter(|s| *s == "goto").count() < 3);

    let interpreter = ValueInterpreter::new();
    let evaluator = Evaluator::new(&interpreter, 200);
    for input in [-100, 0, 4, 5, 6, 1000] {
        let args = [AbstractValue::Int(Some(input))];
        let expected = evaluator.invoke(&body, &args).unwrap();
        assert_eq!(evaluator.invoke(&inlined, &args).unwrap(), expected, "input {input}");
    }
}

#[test]
fn test_scheduler_orders_default_passes() {
    let registry = default_registry();
    let names = [
        RedundantTryCatchPass::NAME,
        ConstantFoldingPass::NAME,
        GotoInliningPass::NAME,
        OpaquePredicatePass::NAME,
    ];
    let scheduler = PassScheduler::from_names(&names, &registry, 10).unwrap();
    let order = scheduler.pass_names();
    let index = |name: &str| order.iter().position(|n| *n == name).unwrap();

    // dead-code removal is pulled in as a dependency and runs first
    assert_eq!(order[0], DeadCodePass::NAME);
    assert!(index(DeadCodePass::NAME) < index(GotoInliningPass::NAME));
    assert!(index(DeadCodePass::NAME) < index(RedundantTryCatchPass::NAME));
    assert_eq!(order.len(), 5);
}

#[test]
fn test_unknown_pass_is_rejected() {
    let registry = default_registry();
    let err = PassScheduler::from_names(&["no-such-pass"], &registry, 10).unwrap_err();
    assert!(matches!(err, Error::UnknownPass(_)));
}

/// Appends junk and then fails.
struct Breaks;

impl MethodPass for Breaks {
    fn name(&self) -> &'static str {
        "breaks"
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        ctx.body_mut().instructions.push(Insn::Nop);
        Err(Error::Error("cannot handle this method".to_string()))
    }
}

fn broken_run(config: EngineConfig) -> (Result<usize>, AnalysisContext, Workspace, MethodBody) {
    let body = MethodBuilder::new("Demo", "victim", "()V")
        .invoke(InvokeKind::Static, "Demo", "work", "()V")
        .vreturn()
        .build()
        .unwrap();
    let workspace = Workspace::from_bodies([body.clone()]);
    let ctx = AnalysisContext::new(config, Arc::new(ClassHierarchy::new()), None);
    let mut scheduler = PassScheduler::with_passes(vec![Box::new(Breaks) as Box<dyn MethodPass>], 3).unwrap();
    let outcome = scheduler.run_pipeline(&ctx, &workspace);
    (outcome, ctx, workspace, body)
}

#[test]
fn test_failed_pass_restores_method() {
    let (outcome, ctx, workspace, original) = broken_run(EngineConfig::default());
    assert!(outcome.is_ok());
    let restored = workspace.get_method_body(&original.key()).unwrap();
    assert_eq!(code(&restored), code(&original));
    assert!(ctx.has_failed(&original.key()));
    assert!(ctx.events.has(EventKind::PassFailed));
}

#[test]
fn test_failed_pass_aborts_when_configured() {
    let config = EngineConfig::default().with_abort_on_error(true);
    let (outcome, _, _, _) = broken_run(config);
    assert!(outcome.is_err());
}

#[test]
fn test_static_callee_is_evaluated() {
    let helper = MethodBuilder::new("Demo", "key", "()I")
        .iconst(6)
        .iconst(7)
        .imul()
        .ireturn()
        .build()
        .unwrap();
    let caller = MethodBuilder::new("Demo", "main", "()I")
        .invokestatic("Demo", "key", "()I")
        .iconst(42)
        .jump(Condition::ICmpEq, "ok")
        .iconst(-1)
        .ireturn()
        .label("ok")
        .iconst(1)
        .ireturn()
        .build()
        .unwrap();
    let key = caller.key();
    let workspace = Workspace::from_bodies([helper, caller]);
    let result = DeobfuscationEngine::default().process(&workspace).unwrap();
    assert!(result.is_clean());
    let body = workspace.get_method_body(&key).unwrap();
    assert_eq!(code(&body), ["iconst_1", "ireturn"]);
}

#[test]
fn test_handler_for_never_instantiated_exception_is_removed() {
    let workspace = Workspace::new();
    workspace.hierarchy().add_class("x/Decoy", Some("java/lang/RuntimeException"), &[]);
    workspace.add_method(MethodBuilder::new("x/Decoy", "<init>", "()V").vreturn().build().unwrap());
    let body = MethodBuilder::new("x/Main", "run", "()V")
        .label("start")
        .invokestatic("x/Lib", "work", "()V")
        .label("end")
        .vreturn()
        .label("handler")
        .pop()
        .invokestatic("x/Lib", "report", "()V")
        .vreturn()
        .try_catch("start", "end", "handler", Some("x/Decoy"))
        .build()
        .unwrap();
    let key = body.key();
    workspace.add_method(body);

    let result = DeobfuscationEngine::default().process(&workspace).unwrap();
    assert!(result.is_clean());
    let body = workspace.get_method_body(&key).unwrap();
    assert!(body.try_catch_blocks.is_empty());
    assert_eq!(code(&body), ["invokestatic x/Lib.work()V", "return"]);
}
