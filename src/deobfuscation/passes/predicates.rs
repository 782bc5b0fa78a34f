//! Opaque predicate folding.
//!
//! A branch whose operands the frames know always goes the same way. The branch is replaced
//! by a `goto` when taken or removed when it falls through, the instructions pushing its operands
//! are blanked, and the code on the abandoned path is pruned.
//!
//! Operands are only removed when their producers sit directly in front of the branch, with no
//! label between them. Anything more involved is left for constant folding to simplify first.
//!
//! | Branch | Decided when |
//! |--------|--------------|
//! | `ifeq` .. `ifle` | the operand is a known `int` |
//! | `if_icmpeq` .. `if_icmple` | both operands are known `int`s |
//! | `ifnull`, `ifnonnull` | the operand is known null or known non-null |
//! | `if_acmpeq`, `if_acmpne` | both are null, or exactly one is null and the other is not |
//! | `tableswitch`, `lookupswitch` | the selector is a known `int` |
//!
//! A switch whose every case leads to its default is a disguised `goto` and is rewritten up front,
//! whatever its selector.

use crate::{
    analysis::{AbstractValue, Frame},
    assembly::{Condition, Insn, InsnId, InsnList, StackOp},
    compiler::{EventKind, MethodPass},
    deobfuscation::{
        passes::{utils::prev_significant, ConstantFoldingPass, DeadCodePass, VariableFoldingPass},
        MethodContext,
    },
    Result,
};

/// Decision for one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    /// Always jumps to the target.
    Taken(InsnId),
    /// Never jumps.
    FallsThrough,
}

/// Rewrites switches whose cases all equal the default into a `goto`. Returns the number of
/// rewritten switches.
///
/// The selector's producer is removed when it is a plain push, otherwise a `pop` discards it.
///
/// # Errors
///
/// Returns an error if the body is structurally damaged.
pub fn collapse_uniform_switches(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let candidates: Vec<(InsnId, InsnId)> = ctx
        .body()
        .instructions
        .iter()
        .filter_map(|(id, insn)| match insn {
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } if targets.iter().all(|target| target == default) => Some((id, *default)),
            _ => None,
        })
        .collect();
    if candidates.is_empty() {
        return Ok(0);
    }

    let list = &mut ctx.body_mut().instructions;
    for &(id, default) in &candidates {
        match prev_significant(list, id) {
            Some(prev) if list.get(prev).is_some_and(is_plain_push) => {
                list.set(prev, Insn::Nop)?;
            }
            _ => {
                list.insert_before(id, Insn::Stack(StackOp::Pop))?;
            }
        }
        list.set(id, Insn::Goto(default))?;
    }
    for _ in &candidates {
        ctx.record(EventKind::BranchSimplified)
            .message("switch with a single destination replaced by goto");
    }
    Ok(candidates.len())
}

/// Folds every branch whose outcome the frames decide. Returns the number of folded branches.
///
/// # Errors
///
/// Returns an error if frames cannot be computed or the body is structurally damaged.
pub fn fold_predicates(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let frames = ctx.frames()?;
    let mut folded = 0;

    for id in ctx.body().instructions.ids() {
        let Some(frame) = frames.at(id) else {
            continue;
        };
        if frame.stack_size() == 0 {
            continue;
        }
        let list = &ctx.body().instructions;
        let Some(insn) = list.get(id) else {
            continue;
        };
        let Some(operands) = operand_producers(list, id, insn) else {
            continue;
        };
        let Some(resolution) = resolve(insn, frame) else {
            continue;
        };
        let (replacement, outcome) = match resolution {
            Resolution::Taken(target) => (Insn::Goto(target), "always taken"),
            Resolution::FallsThrough => (Insn::Nop, "never taken"),
        };
        let description = format!("{insn} {outcome}");

        let list = &mut ctx.body_mut().instructions;
        list.set(id, replacement)?;
        for producer in operands {
            list.set(producer, Insn::Nop)?;
        }
        ctx.record(EventKind::OpaquePredicateRemoved)
            .maybe_location(frames.position(id))
            .message(description);
        folded += 1;
    }
    Ok(folded)
}

/// Pushes with no effect besides the value.
fn is_plain_push(insn: &Insn) -> bool {
    insn.is_pure_producer() || matches!(insn, Insn::Stack(StackOp::Dup))
}

/// Instructions that may be deleted together with the branch consuming their value.
///
/// Static calls qualify because the frames only know their result when evaluation showed them
/// free of effects.
fn is_removable_operand(insn: &Insn) -> bool {
    insn.is_value_producer() || matches!(insn, Insn::Stack(StackOp::Dup))
}

/// The producers of every operand of the branch at `id`, nearest first.
fn operand_producers(list: &InsnList, id: InsnId, insn: &Insn) -> Option<Vec<InsnId>> {
    let count = match insn {
        Insn::If(condition, _) => condition.operand_count(),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => 1,
        _ => return None,
    };
    let mut producers = Vec::with_capacity(count);
    let mut cursor = id;
    for _ in 0..count {
        let prev = prev_significant(list, cursor)?;
        if !list.get(prev).is_some_and(is_removable_operand) {
            return None;
        }
        producers.push(prev);
        cursor = prev;
    }
    Some(producers)
}

/// Decides the branch `insn` using the stack in `frame`.
fn resolve(insn: &Insn, frame: &Frame) -> Option<Resolution> {
    let top = frame.top(0)?;
    let decide = |taken: bool, target: InsnId| {
        if taken {
            Resolution::Taken(target)
        } else {
            Resolution::FallsThrough
        }
    };
    match insn {
        Insn::If(condition, target) => {
            let taken = match condition {
                Condition::Null => null_state(top)?,
                Condition::NonNull => !null_state(top)?,
                Condition::ACmpEq => same_reference(frame.top(1)?, top)?,
                Condition::ACmpNe => !same_reference(frame.top(1)?, top)?,
                unary if unary.operand_count() == 1 => unary.test(top.as_int()?, 0)?,
                binary => binary.test(frame.top(1)?.as_int()?, top.as_int()?)?,
            };
            Some(decide(taken, *target))
        }
        Insn::TableSwitch {
            low,
            default,
            targets,
        } => {
            let key = top.as_int()?;
            let index = usize::try_from(i64::from(key) - i64::from(*low)).ok();
            let target = index
                .and_then(|index| targets.get(index))
                .unwrap_or(default);
            Some(Resolution::Taken(*target))
        }
        Insn::LookupSwitch {
            default,
            keys,
            targets,
        } => {
            let key = top.as_int()?;
            let target = keys
                .iter()
                .position(|&candidate| candidate == key)
                .and_then(|index| targets.get(index))
                .unwrap_or(default);
            Some(Resolution::Taken(*target))
        }
        _ => None,
    }
}

/// `Some(true)` for a known null, `Some(false)` for a known non-null reference.
fn null_state(value: &AbstractValue) -> Option<bool> {
    if value.is_null() {
        Some(true)
    } else if value.is_not_null() {
        Some(false)
    } else {
        None
    }
}

/// Reference equality, decidable only from nullness: two nulls are equal, a null and a non-null
/// reference are not.
fn same_reference(lhs: &AbstractValue, rhs: &AbstractValue) -> Option<bool> {
    match (null_state(lhs)?, null_state(rhs)?) {
        (true, true) => Some(true),
        (true, false) | (false, true) => Some(false),
        (false, false) => None,
    }
}

/// Folds branches decided by known values.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaquePredicatePass;

impl OpaquePredicatePass {
    /// Pass name.
    pub const NAME: &'static str = "opaque-predicate-folding";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for OpaquePredicatePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Replaces branches with known outcomes by gotos or fallthrough"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DeadCodePass::NAME]
    }

    fn recommended_predecessors(&self) -> &'static [&'static str] {
        &[ConstantFoldingPass::NAME, VariableFoldingPass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        let mut changed = collapse_uniform_switches(ctx)? > 0;
        if changed {
            ctx.body_mut().remove_nops();
            ctx.prune_unreachable()?;
        }
        for _ in 0..ctx.config().max_pass_rounds.max(1) {
            if fold_predicates(ctx)? == 0 {
                break;
            }
            ctx.body_mut().remove_nops();
            ctx.prune_unreachable()?;
            changed = true;
        }
        Ok(changed)
    }
}
