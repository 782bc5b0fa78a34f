//! Variable folding.
//!
//! Three rewrites on local variables, each repeated until nothing changes:
//!
//! - **Dead stores.** A store or `iinc` whose slot is not live afterwards is deleted. The value
//!   being stored is deleted with it when a plain push produced it, and discarded with
//!   `pop`/`pop2` otherwise, so side effects of the producer survive.
//! - **Redundant copies.** A slot written exactly once, by `load x; store y`, is a copy of `x`.
//!   If no read of `y` can be reached through a write of `x`, every read of `y` reads `x`
//!   instead and the copy becomes a discard.
//! - **Constant locals** (opt-in). Loads of a slot the frames know to hold a constant become the
//!   constant.
//!
//! The discards left behind are cleaned up by constant folding.

use std::collections::{HashMap, VecDeque};

use crate::{
    analysis::{FlowGraph, Liveness},
    assembly::{Constant, Insn, InsnId, InsnList, StackOp, VarKind},
    compiler::{EventKind, MethodPass},
    deobfuscation::{
        passes::{utils::prev_significant, utils::removable_producer, ConstantFoldingPass},
        MethodContext,
    },
    Result,
};

/// What happens to a dead store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadStore {
    /// Delete the store and the push feeding it.
    WithProducer(InsnId),
    /// Replace the store with a discard of its width.
    Discard(usize),
    /// Delete the instruction (`iinc`).
    Delete,
}

/// Removes stores and increments whose value is never read. Returns the number removed.
///
/// # Errors
///
/// Returns an error if the flow graph cannot be built or the body is structurally damaged.
pub fn remove_dead_stores(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let liveness = Liveness::compute(ctx.body())?;
    let reachable = liveness.graph().reachable();
    let list = &ctx.body().instructions;

    let mut dead = Vec::new();
    for (pos, &id) in liveness.graph().positions().order().iter().enumerate() {
        if !reachable.contains(pos) {
            continue;
        }
        let action = match list.get(id) {
            Some(Insn::Store(kind, slot)) if !liveness.is_live_after(id, *slot) => {
                match removable_producer(list, id) {
                    Some(producer)
                        if list
                            .get(producer)
                            .is_some_and(|insn| insn.size_produced() == kind.size()) =>
                    {
                        DeadStore::WithProducer(producer)
                    }
                    _ => DeadStore::Discard(kind.size()),
                }
            }
            Some(Insn::Iinc { slot, .. }) if !liveness.is_live_after(id, *slot) => DeadStore::Delete,
            _ => continue,
        };
        dead.push((id, pos, action));
    }
    if dead.is_empty() {
        return Ok(0);
    }

    let list = &mut ctx.body_mut().instructions;
    for &(id, _, action) in &dead {
        match action {
            DeadStore::WithProducer(producer) => {
                list.set(producer, Insn::Nop)?;
                list.set(id, Insn::Nop)?;
            }
            DeadStore::Discard(2) => {
                list.set(id, Insn::Stack(StackOp::Pop2))?;
            }
            DeadStore::Discard(_) => {
                list.set(id, Insn::Stack(StackOp::Pop))?;
            }
            DeadStore::Delete => {
                list.set(id, Insn::Nop)?;
            }
        }
    }
    for &(_, pos, action) in &dead {
        let message = match action {
            DeadStore::WithProducer(_) | DeadStore::Delete => "removed unread write",
            DeadStore::Discard(_) => "unread write replaced by discard",
        };
        ctx.record(EventKind::DeadStoreRemoved)
            .location(pos)
            .message(message);
    }
    Ok(dead.len())
}

/// State of the forward walk from a copy.
///
/// States only rise, `Unvisited < Clean < Tainted`, so the walk terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Taint {
    /// Not reached from the copy.
    Unvisited,
    /// Reached, and the copy still equals its source on every path so far.
    Clean,
    /// Reached through a write of the source.
    Tainted,
}

/// A `load source; store copy` pair.
#[derive(Debug, Clone, Copy)]
struct Copy {
    store: InsnId,
    kind: VarKind,
    source: u16,
    copy: u16,
}

/// Returns `true` if `insn` writes any slot in `slot..slot + width`.
fn clobbers(insn: &Insn, slot: u16, width: usize) -> bool {
    let (start, size) = match insn {
        Insn::Store(kind, written) => (*written, kind.size()),
        Insn::Iinc { slot: written, .. } => (*written, 1),
        _ => return false,
    };
    let (start, end) = (usize::from(start), usize::from(start) + size);
    let (slot, slot_end) = (usize::from(slot), usize::from(slot) + width);
    start < slot_end && slot < end
}

/// Finds copy candidates: slots with a single write that is `load x; store y`.
fn find_copies(ctx: &mut MethodContext<'_>, graph: &FlowGraph) -> Result<Vec<Copy>> {
    let frames = ctx.frames()?;
    let body = ctx.body();
    let list = &body.instructions;
    let reachable = graph.reachable();
    let parameters = body.parameter_slots();

    let mut writes: HashMap<u16, Vec<InsnId>> = HashMap::new();
    for (pos, &id) in graph.positions().order().iter().enumerate() {
        if !reachable.contains(pos) {
            continue;
        }
        match list.get(id) {
            Some(Insn::Store(kind, slot)) => {
                for covered in *slot..*slot + kind.size() as u16 {
                    writes.entry(covered).or_default().push(id);
                }
            }
            Some(Insn::Iinc { slot, .. }) => writes.entry(*slot).or_default().push(id),
            _ => {}
        }
    }

    let mut copies: Vec<Copy> = writes
        .iter()
        .filter(|(&slot, stores)| usize::from(slot) >= parameters && stores.len() == 1)
        .filter_map(|(&slot, stores)| {
            let store = stores[0];
            let Some(&Insn::Store(kind, copy)) = list.get(store) else {
                return None;
            };
            if copy != slot {
                return None;
            }
            if kind.size() == 2 && writes.get(&(slot + 1)).map_or(true, |upper| upper.len() != 1) {
                return None;
            }
            let load = prev_significant(list, store)?;
            let Some(&Insn::Load(load_kind, source)) = list.get(load) else {
                return None;
            };
            let width = kind.size();
            let disjoint = usize::from(source) + width <= usize::from(copy)
                || usize::from(copy) + width <= usize::from(source);
            let defined = frames
                .at(load)
                .is_some_and(|frame| frame.get_local(usize::from(source)).kind() == Some(kind));
            (load_kind == kind && disjoint && defined).then_some(Copy {
                store,
                kind,
                source,
                copy,
            })
        })
        .collect();
    copies.sort_by_key(|candidate| candidate.copy);
    Ok(copies)
}

/// Returns `true` if no read of the copy is reachable through a write of the source.
fn copy_is_faithful(list: &InsnList, graph: &FlowGraph, candidate: &Copy) -> bool {
    let positions = graph.positions();
    let Some(origin) = positions.of(candidate.store) else {
        return false;
    };
    let width = candidate.kind.size();
    let mut states = vec![Taint::Unvisited; graph.len()];
    let mut worklist = VecDeque::new();
    for succ in graph.successors(origin) {
        if states[succ] < Taint::Clean {
            states[succ] = Taint::Clean;
            worklist.push_back(succ);
        }
    }

    while let Some(pos) = worklist.pop_front() {
        let Some(insn) = positions.at(pos).and_then(|id| list.get(id)) else {
            continue;
        };
        let state = states[pos];
        if state == Taint::Tainted && insn.reads_local() == Some(candidate.copy) {
            return false;
        }
        let out = if pos == origin {
            Taint::Clean
        } else if clobbers(insn, candidate.source, width) {
            Taint::Tainted
        } else {
            state
        };
        for succ in graph.successors(pos) {
            if states[succ] < out {
                states[succ] = out;
                worklist.push_back(succ);
            }
        }
    }
    true
}

/// Replaces one redundant copy variable by its source. Returns the number of copies removed
/// (zero or one).
///
/// Only one copy is rewritten per call, since rewriting it can turn another candidate's source
/// load into a read of a different slot.
///
/// # Errors
///
/// Returns an error if frames or the flow graph cannot be computed.
pub fn propagate_copies(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let graph = FlowGraph::build(ctx.body())?;
    let candidates = find_copies(ctx, &graph)?;
    let Some(candidate) = candidates
        .into_iter()
        .find(|candidate| copy_is_faithful(&ctx.body().instructions, &graph, candidate))
    else {
        return Ok(0);
    };

    let reads: Vec<InsnId> = ctx
        .body()
        .instructions
        .iter()
        .filter(|(_, insn)| matches!(insn, Insn::Load(kind, slot) if *kind == candidate.kind && *slot == candidate.copy))
        .map(|(id, _)| id)
        .collect();

    let list = &mut ctx.body_mut().instructions;
    for &read in &reads {
        list.set(read, Insn::Load(candidate.kind, candidate.source))?;
    }
    let discard = if candidate.kind.size() == 2 {
        StackOp::Pop2
    } else {
        StackOp::Pop
    };
    list.set(candidate.store, Insn::Stack(discard))?;

    let location = graph.positions().of(candidate.store);
    ctx.record(EventKind::CopyPropagated)
        .maybe_location(location)
        .message(format!(
            "slot {} is a copy of slot {} ({} reads redirected)",
            candidate.copy,
            candidate.source,
            reads.len()
        ));
    Ok(1)
}

/// Replaces loads of locals holding a known constant with the constant. Returns the number of
/// replaced loads.
///
/// # Errors
///
/// Returns an error if frames cannot be computed.
pub fn inline_constant_locals(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let frames = ctx.frames()?;
    let replacements: Vec<(InsnId, Constant)> = ctx
        .body()
        .instructions
        .iter()
        .filter_map(|(id, insn)| {
            let Insn::Load(kind, slot) = insn else {
                return None;
            };
            let value = frames.at(id)?.get_local(usize::from(*slot));
            if value.kind() != Some(*kind) {
                return None;
            }
            value
                .to_constant()
                .or_else(|| value.is_null().then_some(Constant::Null))
                .map(|constant| (id, constant))
        })
        .collect();
    if replacements.is_empty() {
        return Ok(0);
    }

    let list = &mut ctx.body_mut().instructions;
    for (id, constant) in &replacements {
        list.set(*id, Insn::Const(constant.clone()))?;
    }
    for (id, constant) in &replacements {
        ctx.record(EventKind::ConstantLocalInlined)
            .maybe_location(frames.position(*id))
            .message(format!("load replaced by {constant}"));
    }
    Ok(replacements.len())
}

/// Folds dead stores, redundant copies and (optionally) constant locals.
#[derive(Debug, Default, Clone, Copy)]
pub struct VariableFoldingPass;

impl VariableFoldingPass {
    /// Pass name.
    pub const NAME: &'static str = "variable-folding";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for VariableFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Removes dead stores and redundant copy variables"
    }

    fn recommended_successors(&self) -> &'static [&'static str] {
        &[ConstantFoldingPass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        let mut changed = false;
        for _ in 0..ctx.config().max_pass_rounds.max(1) {
            let mut work = 0;
            if ctx.config().inline_constant_locals {
                work += inline_constant_locals(ctx)?;
            }
            work += remove_dead_stores(ctx)?;
            if work == 0 {
                work += propagate_copies(ctx)?;
            }
            if work == 0 {
                break;
            }
            ctx.body_mut().remove_nops();
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::ClassHierarchy,
        assembly::{Condition, MethodBody, MethodBuilder},
        deobfuscation::{AnalysisContext, EngineConfig},
    };

    fn run_with(config: EngineConfig, body: MethodBody) -> (bool, Vec<String>) {
        let analysis = AnalysisContext::new(config, Arc::new(ClassHierarchy::new()), None);
        let mut ctx = MethodContext::new(body, VariableFoldingPass::NAME, &analysis);
        let changed = VariableFoldingPass.run_on_method(&mut ctx).unwrap();
        assert!(!VariableFoldingPass.run_on_method(&mut ctx).unwrap());
        ctx.body().verify().unwrap();
        let code = ctx
            .body()
            .instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| match insn {
                Insn::If(..) => "if".to_string(),
                Insn::Goto(_) => "goto".to_string(),
                other => other.to_string(),
            })
            .collect();
        (changed, code)
    }

    fn run(body: MethodBody) -> (bool, Vec<String>) {
        run_with(EngineConfig::default(), body)
    }

    #[test]
    fn test_clobbers() {
        assert!(clobbers(&Insn::Store(VarKind::Long, 1), 2, 1));
        assert!(!clobbers(&Insn::Store(VarKind::Int, 3), 1, 2));
        assert!(clobbers(&Insn::Iinc { slot: 4, delta: 1 }, 4, 1));
        assert!(!clobbers(&Insn::Load(VarKind::Int, 4), 4, 1));
    }

    #[test]
    fn test_dead_store_with_constant() {
        let body = MethodBuilder::new("A", "m", "()V")
            .iconst(5)
            .istore(1)
            .vreturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        assert_eq!(code, ["return"]);
    }

    #[test]
    fn test_dead_store_keeps_call() {
        let body = MethodBuilder::new("A", "m", "()V")
            .invokestatic("A", "next", "()I")
            .istore(1)
            .vreturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        assert_eq!(code, ["invokestatic A.next()I", "pop", "return"]);
    }

    #[test]
    fn test_live_store_kept() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .istore(1)
            .iinc(1, 2)
            .iload(1)
            .ireturn()
            .build()
            .unwrap();
        let (_, code) = run(body);
        assert!(code.contains(&"iinc 1 2".to_string()));
        assert_eq!(code.last().map(String::as_str), Some("ireturn"));
    }

    #[test]
    fn test_dead_iinc_removed() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iinc(0, 1)
            .iconst(0)
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        assert_eq!(code, ["iconst_0", "ireturn"]);
    }

    #[test]
    fn test_wide_dead_store() {
        let body = MethodBuilder::new("A", "m", "(J)V")
            .load(VarKind::Long, 0)
            .store(VarKind::Long, 2)
            .vreturn()
            .build()
            .unwrap();
        let (_, code) = run(body);
        assert_eq!(code, ["return"]);
    }

    #[test]
    fn test_dead_store_of_duplicate() {
        let body = MethodBuilder::new("A", "m", "()I")
            .invokestatic("A", "next", "()I")
            .dup()
            .istore(1)
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        // the duplicate goes with the store instead of leaving a dup/pop pair
        assert_eq!(code, ["invokestatic A.next()I", "ireturn"]);
    }

    #[test]
    fn test_wide_dead_store_of_duplicate() {
        let body = MethodBuilder::new("A", "m", "()J")
            .invokestatic("A", "next", "()J")
            .stack(StackOp::Dup2)
            .store(VarKind::Long, 1)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        assert_eq!(code, ["invokestatic A.next()J", "lreturn"]);
    }

    #[test]
    fn test_copy_propagated() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .istore(1)
            .iload(1)
            .iload(1)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(changed);
        // the copy becomes a discard for constant folding to clean up
        assert_eq!(code, ["iload 0", "pop", "iload 0", "iload 0", "iadd", "ireturn"]);
    }

    #[test]
    fn test_copy_kept_when_source_changes() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .istore(1)
            .iinc(0, 1)
            .iload(1)
            .iload(0)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = run(body);
        assert!(!changed);
        assert!(code.contains(&"istore 1".to_string()));
    }

    #[test]
    fn test_copy_kept_when_loop_writes_source() {
        // the write of slot 0 is only reached on the second iteration
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .istore(1)
            .label("loop")
            .iload(1)
            .jump(Condition::Eq, "done")
            .iinc(0, -1)
            .goto("loop")
            .label("done")
            .iload(0)
            .ireturn()
            .build()
            .unwrap();
        let (_, code) = run(body);
        assert!(code.contains(&"istore 1".to_string()));
    }

    #[test]
    fn test_constant_locals_inlined_when_enabled() {
        let body = || {
            MethodBuilder::new("A", "m", "()I")
                .iconst(3)
                .istore(0)
                .iload(0)
                .ireturn()
                .build()
                .unwrap()
        };
        let (_, code) = run(body());
        assert_eq!(code, ["iconst_3", "istore 0", "iload 0", "ireturn"]);

        let config = EngineConfig::default().with_inline_constant_locals(true);
        let (changed, code) = run_with(config, body());
        assert!(changed);
        assert_eq!(code, ["iconst_3", "ireturn"]);
    }
}
