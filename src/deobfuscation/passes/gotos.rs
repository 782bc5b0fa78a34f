//! Goto inlining.
//!
//! Obfuscators shred a method into blocks and stitch them back together with unconditional
//! jumps. This pass moves a jumped-to block directly behind the `goto` that reaches it whenever
//! that `goto` is the block's only way in, then deletes the `goto`.
//!
//! # Visit counts
//!
//! Every label gets a count of the ways control can arrive at it:
//!
//! - one per jump or switch entry naming it,
//! - one for implicit fallthrough from the code above it,
//! - a large constant for labels used by exception ranges, which must never move.
//!
//! A `goto` is only inlined when its target's count is exactly one.
//!
//! # Rules
//!
//! | Rule | Shape | Result |
//! |------|-------|--------|
//! | Trivial | `goto L; L:` | `nop` |
//! | Chain | `goto L; ... L: goto M` | `goto M`, revisited |
//! | General | `goto L; ... L: block; terminator` | block moved after the `goto` |
//!
//! The general rule rejects blocks that straddle an exception range boundary relative to the
//! `goto`, blocks whose move would leave code falling off the end of the method, blocks with an
//! inner label reachable from outside, blocks that loop back to the `goto`, and blocks
//! containing a switch.

use std::collections::HashMap;

use crate::{
    assembly::{Insn, InsnId, MethodBody, Positions},
    compiler::{EventKind, MethodPass},
    deobfuscation::{
        passes::{prune_unreachable, utils::next_real, utils::prev_real, DeadCodePass},
        MethodContext,
    },
    Result,
};

/// Visit count given to labels used by exception ranges.
const PINNED: usize = 100;

/// Outcome of one inlining run over a body.
#[derive(Debug)]
pub struct InlineOutcome {
    /// The rewritten body.
    pub body: MethodBody,
    /// Positions (in the pruned input) of each rewritten `goto`.
    pub sites: Vec<usize>,
}

/// Inlines gotos in a copy of `body`.
///
/// Returns `None` when nothing was inlined; the input is never modified.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the body references unlinked labels.
pub fn inline_gotos(body: &MethodBody) -> Result<Option<InlineOutcome>> {
    let mut work = body.clone();
    prune_unreachable(&mut work)?;

    let mut counts = visit_counts(&work);
    let mut sites = Vec::new();

    'restart: loop {
        let ids = work.instructions.ids();
        let mut index = 0;
        while index < ids.len() {
            let id = ids[index];
            index += 1;
            let Some(&Insn::Goto(target)) = work.instructions.get(id) else {
                continue;
            };
            if counts.get(&target).copied().unwrap_or(0) > 1 {
                continue;
            }
            let site = work.positions().of(id).unwrap_or_default();

            if work.instructions.next(id) == Some(target) {
                work.instructions.set(id, Insn::Nop)?;
                decrement(&mut counts, target);
                sites.push(site);
                continue;
            }

            if let Some(next) = next_real(&work.instructions, target) {
                if let Some(&Insn::Goto(destination)) = work.instructions.get(next) {
                    if destination != target && next != id {
                        work.instructions.set(id, Insn::Goto(destination))?;
                        decrement(&mut counts, target);
                        *counts.entry(destination).or_insert(0) += 1;
                        sites.push(site);
                        index -= 1;
                        continue;
                    }
                }
            }

            if let Some(last) = collect_block(&work, id, target, &counts) {
                work.instructions.move_range_after(target, last, id)?;
                work.instructions.remove(id)?;
                decrement(&mut counts, target);
                sites.push(site);
                continue 'restart;
            }
        }
        break;
    }

    if sites.is_empty() {
        return Ok(None);
    }
    work.remove_nops();
    prune_unreachable(&mut work)?;
    work.repair_local_ranges()?;
    Ok(Some(InlineOutcome { body: work, sites }))
}

fn decrement(counts: &mut HashMap<InsnId, usize>, label: InsnId) {
    if let Some(count) = counts.get_mut(&label) {
        *count = count.saturating_sub(1);
    }
}

/// Per-label count of explicit references, implicit fallthrough and range pins.
fn visit_counts(body: &MethodBody) -> HashMap<InsnId, usize> {
    let list = &body.instructions;
    let mut counts = body.flow_references();
    for label in body.range_labels() {
        counts.insert(label, PINNED);
    }

    for (id, insn) in list {
        if !insn.is_label() {
            continue;
        }
        let mut cursor = list.prev(id);
        let falls_in = loop {
            let Some(prev) = cursor else {
                break true;
            };
            match list.get(prev) {
                Some(insn) if insn.is_terminal() => break false,
                Some(Insn::Label) if counts.get(&prev).copied().unwrap_or(0) > 0 => break true,
                _ => cursor = list.prev(prev),
            }
        };
        if falls_in {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

/// Finds the last instruction of the block starting at `target`, or `None` if it must not move.
fn collect_block(
    body: &MethodBody,
    goto: InsnId,
    target: InsnId,
    counts: &HashMap<InsnId, usize>,
) -> Option<InsnId> {
    let list = &body.instructions;
    let positions = body.positions();
    let goto_pos = positions.of(goto)?;

    let mut cursor = Some(target);
    while let Some(id) = cursor {
        if id == goto {
            return None;
        }
        let insn = list.get(id)?;
        if id != target && insn.is_label() && counts.get(&id).copied().unwrap_or(0) > 1 {
            return None;
        }
        if crosses_range(body, &positions, goto_pos, positions.of(id)?) {
            return None;
        }
        if insn.is_switch() {
            return None;
        }
        if insn.is_terminal() {
            let at_end = next_real(list, id).is_none();
            if at_end {
                let falls_off = prev_real(list, target)
                    .and_then(|prev| list.get(prev))
                    .is_some_and(|prev| !prev.is_terminal());
                if falls_off {
                    return None;
                }
            }
            return Some(id);
        }
        cursor = list.next(id);
    }
    None
}

/// Returns `true` if `a` and `b` lie on different sides of any exception range boundary.
fn crosses_range(body: &MethodBody, positions: &Positions, a: usize, b: usize) -> bool {
    body.try_catch_blocks.iter().any(|tcb| {
        let (Some(start), Some(end)) = (positions.of(tcb.start), positions.of(tcb.end)) else {
            return true;
        };
        let inside = |pos: usize| pos >= start && pos < end;
        inside(a) != inside(b)
    })
}

/// Moves single-entry blocks behind the gotos that reach them.
#[derive(Debug, Default, Clone, Copy)]
pub struct GotoInliningPass;

impl GotoInliningPass {
    /// Pass name.
    pub const NAME: &'static str = "goto-inlining";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for GotoInliningPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Inlines blocks reached by a single goto and collapses goto chains"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DeadCodePass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        let mut changed = false;
        for _ in 0..ctx.config().max_pass_rounds.max(1) {
            let Some(outcome) = inline_gotos(ctx.body())? else {
                break;
            };
            for site in &outcome.sites {
                ctx.record(EventKind::GotoInlined).location(*site);
            }
            ctx.replace_body(outcome.body);
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
        analysis::{AbstractValue, ClassHierarchy, Evaluator, ValueInterpreter},
        assembly::{Condition, MethodBuilder},
        deobfuscation::{AnalysisContext, EngineConfig},
    };

    fn real(body: &MethodBody) -> Vec<String> {
        body.instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| insn.to_string())
            .collect()
    }

    #[test]
    fn test_goto_over_junk() {
        let body = MethodBuilder::new("A", "m", "()V")
            .goto("l")
            .iconst(1)
            .pop()
            .label("l")
            .vreturn()
            .build()
            .unwrap();
        let outcome = inline_gotos(&body).unwrap().unwrap();
        assert_eq!(real(&outcome.body), ["return"]);
        assert!(inline_gotos(&outcome.body).unwrap().is_none());
    }

    #[test]
    fn test_shuffled_blocks_are_linearised() {
        // entry -> second -> first, written out of order
        let body = MethodBuilder::new("A", "m", "()I")
            .goto("second")
            .label("first")
            .iconst(2)
            .ireturn()
            .label("second")
            .iconst(1)
            .pop()
            .goto("first")
            .build()
            .unwrap();
        let outcome = inline_gotos(&body).unwrap().unwrap();
        assert_eq!(real(&outcome.body), ["iconst_1", "pop", "iconst_2", "ireturn"]);
        outcome.body.verify().unwrap();
    }

    #[test]
    fn test_shared_target_is_left_alone() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .jump(Condition::Eq, "shared")
            .goto("shared")
            .label("shared")
            .iconst(0)
            .ireturn()
            .build()
            .unwrap();
        // `shared` has two ways in
        assert!(inline_gotos(&body).unwrap().is_none());
    }

    #[test]
    fn test_chain_is_collapsed() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .jump(Condition::Eq, "out")
            .goto("hop")
            .label("out")
            .iconst(1)
            .ireturn()
            .label("hop")
            .goto("out")
            .build()
            .unwrap();
        let outcome = inline_gotos(&body).unwrap().unwrap();
        assert_eq!(outcome.sites.len(), 1);
        // `hop` is bypassed and then pruned as unreachable
        let code = real(&outcome.body);
        assert_eq!(code.len(), 5);
        assert_eq!(code.iter().filter(|s| s.starts_with("goto")).count(), 1);
        outcome.body.verify().unwrap();
    }

    #[test]
    fn test_block_inside_range_is_not_moved_out() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .goto("body")
            .label("end")
            .vreturn()
            .label("body")
            .invokestatic("A", "call", "()V")
            .vreturn()
            .label("handler")
            .athrow()
            .try_catch("start", "end", "handler", None)
            .build()
            .unwrap();
        assert!(inline_gotos(&body).unwrap().is_none());
    }

    #[test]
    fn test_switch_blocks_are_not_moved() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .goto("dispatch")
            .label("a")
            .iconst(1)
            .ireturn()
            .label("dispatch")
            .iload(0)
            .tableswitch(0, "a", &["a"])
            .build()
            .unwrap();
        assert!(inline_gotos(&body).unwrap().is_none());
    }

    #[test]
    fn test_inlining_preserves_results() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .goto("check")
            .label("neg")
            .iconst(-1)
            .ireturn()
            .label("check")
            .iload(0)
            .jump(Condition::Lt, "neg")
            .iload(0)
            .iconst(2)
            .imul()
            .ireturn()
            .build()
            .unwrap();
        let outcome = inline_gotos(&body).unwrap().unwrap();
        let interpreter = ValueInterpreter::new();
        for input in [-5, 0, 7] {
            let args = [AbstractValue::Int(Some(input))];
            let before = Evaluator::new(&interpreter, 100).invoke(&body, &args).unwrap();
            let after = Evaluator::new(&interpreter, 100)
                .invoke(&outcome.body, &args)
                .unwrap();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_pass_is_idempotent() {
        let analysis =
            AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None);
        let body = MethodBuilder::new("A", "m", "()I")
            .goto("b")
            .label("a")
            .iconst(2)
            .ireturn()
            .label("b")
            .goto("a")
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, GotoInliningPass::NAME, &analysis);
        assert!(GotoInliningPass.run_on_method(&mut ctx).unwrap());
        assert!(!GotoInliningPass.run_on_method(&mut ctx).unwrap());
        assert_eq!(real(ctx.body()), ["iconst_2", "ireturn"]);
        assert!(analysis.events.count_kind(EventKind::GotoInlined) > 0);
    }
}
