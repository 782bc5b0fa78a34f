//! Stack shuffle normalization.
//!
//! Rewrites `dup*`, `pop*` and `swap` so the operand stack is built by plain producers. Every
//! rewrite needs the producers of the shuffled values to be identified with nothing in between,
//! and only ever clones or moves producers that have no side effects.
//!
//! | Shuffle | Condition | Rewrite |
//! |---------|-----------|---------|
//! | `dup` | top known | constant |
//! | `dup` | producer clonable | clone of the producer |
//! | `dup2` | producers clonable | clones of both (or of the wide one) |
//! | `dup_x1`, `dup_x2` | producers clonable | clone inserted below the covered values |
//! | `dup2_x1`, `dup2_x2` | producers clonable | clones inserted below the covered values |
//! | `pop`, `pop2` | producers pure | producers and shuffle deleted |
//! | `swap` | producers movable | producers reordered |

use crate::{
    assembly::{opcodes, Insn, InsnId, InsnList, StackOp},
    compiler::EventKind,
    deobfuscation::{
        passes::folding::{binary_arguments, collect_argument, is_clonable_producer, BinaryArguments},
        MethodContext,
    },
    Result,
};

/// Rewrites stack shuffles into explicit producers. Returns `true` if anything changed.
///
/// # Errors
///
/// Returns an error if frames cannot be computed or the body is structurally damaged.
pub fn normalize_stack(ctx: &mut MethodContext<'_>) -> Result<bool> {
    let frames = ctx.frames()?;
    let ids = ctx.body().instructions.ids();
    let mut changed = false;

    for id in ids {
        let Some(frame) = frames.at(id) else {
            continue;
        };
        if frame.stack_size() == 0 {
            continue;
        }
        let Some(Insn::Stack(op)) = ctx.body().instructions.get(id).cloned() else {
            continue;
        };
        if frame.stack_slots() < op.depth() {
            continue;
        }
        // Sizes of the values on top of the stack, top first.
        let sizes: Vec<usize> = (0..4)
            .map_while(|depth| frame.top(depth).map(|value| value.size()))
            .collect();
        let singles = |n: usize| sizes.len() >= n && sizes[..n].iter().all(|&s| s == 1);

        let list = &mut ctx.body_mut().instructions;
        let rewritten = match op {
            StackOp::Dup => {
                let known = frame.top(0).and_then(|top| top.to_constant());
                match known {
                    Some(constant) => {
                        list.set(id, Insn::Const(constant))?;
                        true
                    }
                    None => clone_previous(list, id)?,
                }
            }
            StackOp::Dup2 => match pair(list, id, opcodes::DUP2) {
                Some(args) if args.is_wide() => {
                    let Some(producer) = clonable(list, args.right.insn) else {
                        continue;
                    };
                    list.set(id, producer)?;
                    true
                }
                Some(args) => {
                    let (Some(left), Some(right)) =
                        (clonable(list, args.left.insn), clonable(list, args.right.insn))
                    else {
                        continue;
                    };
                    list.insert_after(id, right)?;
                    list.set(id, left)?;
                    true
                }
                None => false,
            },
            StackOp::DupX1 if singles(2) => match pair(list, id, opcodes::DUP2_X1) {
                Some(args) => {
                    let Some(right) = clonable(list, args.right.insn) else {
                        continue;
                    };
                    list.insert_before(args.left.insn, right)?;
                    list.set(id, Insn::Nop)?;
                    true
                }
                None => false,
            },
            StackOp::DupX2 if singles(3) => match pair(list, id, opcodes::DUP2_X1) {
                Some(args) => {
                    let Some(prior) = direct_argument(list, args.left.insn) else {
                        continue;
                    };
                    let Some(right) = clonable(list, args.right.insn) else {
                        continue;
                    };
                    list.insert_before(prior, right)?;
                    list.set(id, Insn::Nop)?;
                    true
                }
                None => false,
            },
            StackOp::Dup2X1 => match pair(list, id, opcodes::DUP2_X1) {
                Some(args) => {
                    let covered = if args.is_wide() { 1 } else { 2 };
                    if sizes.get(covered) != Some(&1) {
                        continue;
                    }
                    let Some(prior) = direct_argument(list, args.left.insn) else {
                        continue;
                    };
                    if !insert_copies(list, &args, prior)? {
                        continue;
                    }
                    list.set(id, Insn::Nop)?;
                    true
                }
                None => false,
            },
            StackOp::Dup2X2 => match pair(list, id, opcodes::DUP2_X1) {
                Some(args) => {
                    let Some(prior) = list
                        .prev(args.left.insn)
                        .and_then(|before| binary_arguments(list, Some(before), opcodes::DUP2_X1))
                        .filter(BinaryArguments::is_direct)
                    else {
                        continue;
                    };
                    if !insert_copies(list, &args, prior.left.insn)? {
                        continue;
                    }
                    list.set(id, Insn::Nop)?;
                    true
                }
                None => false,
            },
            StackOp::Pop => match collect_argument(list, list.prev(id)) {
                Some(arg)
                    if arg.intermediates.is_empty()
                        && list.get(arg.insn).is_some_and(Insn::is_pure_producer) =>
                {
                    list.set(arg.insn, Insn::Nop)?;
                    list.set(id, Insn::Nop)?;
                    true
                }
                _ => false,
            },
            StackOp::Pop2 => match pair(list, id, opcodes::POP2) {
                Some(args)
                    if list.get(args.left.insn).is_some_and(Insn::is_pure_producer)
                        && list.get(args.right.insn).is_some_and(Insn::is_pure_producer) =>
                {
                    args.blank(list)?;
                    list.set(id, Insn::Nop)?;
                    true
                }
                _ => false,
            },
            StackOp::Swap if singles(2) => match pair(list, id, opcodes::POP2) {
                Some(args)
                    if clonable(list, args.left.insn).is_some()
                        && clonable(list, args.right.insn).is_some() =>
                {
                    list.move_range_after(args.left.insn, args.left.insn, args.right.insn)?;
                    list.set(id, Insn::Nop)?;
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if rewritten {
            ctx.record(EventKind::StackNormalized)
                .maybe_location(frames.position(id))
                .message(format!("normalized {}", <&str>::from(op)));
            changed = true;
        }
    }
    Ok(changed)
}

/// Both producers of the two values consumed by the shuffle at `id`, with nothing in between.
fn pair(list: &InsnList, id: InsnId, shape: u8) -> Option<BinaryArguments> {
    binary_arguments(list, list.prev(id), shape).filter(BinaryArguments::is_direct)
}

/// The producer directly below `insn`, with nothing in between.
fn direct_argument(list: &InsnList, insn: InsnId) -> Option<InsnId> {
    collect_argument(list, list.prev(insn))
        .filter(|arg| arg.intermediates.is_empty())
        .map(|arg| arg.insn)
}

/// A copy of the producer at `id`, if it may be duplicated.
fn clonable(list: &InsnList, id: InsnId) -> Option<Insn> {
    list.get(id).filter(|insn| is_clonable_producer(insn)).cloned()
}

/// Inserts copies of both operands (or of the wide one) before `target`.
fn insert_copies(list: &mut InsnList, args: &BinaryArguments, target: InsnId) -> Result<bool> {
    if args.is_wide() {
        let Some(value) = clonable(list, args.right.insn) else {
            return Ok(false);
        };
        list.insert_before(target, value)?;
        return Ok(true);
    }
    let (Some(left), Some(right)) = (clonable(list, args.left.insn), clonable(list, args.right.insn))
    else {
        return Ok(false);
    };
    list.insert_before(target, left)?;
    list.insert_before(target, right)?;
    Ok(true)
}

/// Replaces a `dup` with a copy of the single producer right before it.
fn clone_previous(list: &mut InsnList, id: InsnId) -> Result<bool> {
    let Some(arg) = collect_argument(list, list.prev(id)) else {
        return Ok(false);
    };
    if !arg.intermediates.is_empty() {
        return Ok(false);
    }
    let Some(producer) = clonable(list, arg.insn) else {
        return Ok(false);
    };
    list.set(id, producer)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::ClassHierarchy,
        assembly::{BinaryOp, MethodBody, MethodBuilder, NumKind, VarKind},
        deobfuscation::{AnalysisContext, EngineConfig},
    };

    fn normalize(body: MethodBody) -> (bool, Vec<String>) {
        let analysis =
            AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None);
        let mut ctx = MethodContext::new(body, "test", &analysis);
        let changed = normalize_stack(&mut ctx).unwrap();
        ctx.body_mut().remove_nops();
        let code = ctx
            .body()
            .instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| insn.to_string())
            .collect();
        (changed, code)
    }

    #[test]
    fn test_dup_of_unknown_load() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .dup()
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 0", "iload 0", "iadd", "ireturn"]);
    }

    #[test]
    fn test_dup_x1() {
        let body = MethodBuilder::new("A", "m", "(II)I")
            .iload(0)
            .iload(1)
            .stack(StackOp::DupX1)
            .pop()
            .pop()
            .ireturn()
            .build()
            .unwrap();
        // the copy is pushed below both values, then both pops discard plain loads
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 1", "ireturn"]);
    }

    #[test]
    fn test_dup2_then_pops_collapse() {
        let body = MethodBuilder::new("A", "m", "(II)V")
            .iload(0)
            .iload(1)
            .stack(StackOp::Dup2)
            .stack(StackOp::Pop2)
            .stack(StackOp::Pop2)
            .vreturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["return"]);
    }

    #[test]
    fn test_dup_of_call_is_kept() {
        let body = MethodBuilder::new("A", "m", "()I")
            .invokestatic("A", "next", "()I")
            .dup()
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, _) = normalize(body);
        assert!(!changed);
    }

    #[test]
    fn test_dup_across_label_is_kept() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .label("merge")
            .dup()
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, _) = normalize(body);
        assert!(!changed);
    }

    #[test]
    fn test_dup2_of_wide_load() {
        let body = MethodBuilder::new("A", "m", "(J)J")
            .load(VarKind::Long, 0)
            .stack(StackOp::Dup2)
            .binary(BinaryOp::Add, NumKind::Long)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["lload 0", "lload 0", "ladd", "lreturn"]);
    }

    #[test]
    fn test_dup_x2() {
        let body = MethodBuilder::new("A", "m", "(III)I")
            .iload(0)
            .iload(1)
            .iload(2)
            .stack(StackOp::DupX2)
            .pop()
            .pop()
            .pop()
            .ireturn()
            .build()
            .unwrap();
        // c below a and b, then the three original loads are discarded
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 2", "ireturn"]);
    }

    #[test]
    fn test_dup2_x1_narrow() {
        let body = MethodBuilder::new("A", "m", "(III)I")
            .iload(0)
            .iload(1)
            .iload(2)
            .stack(StackOp::Dup2X1)
            .stack(StackOp::Pop2)
            .pop()
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 1", "iload 2", "iadd", "ireturn"]);
    }

    #[test]
    fn test_dup2_x1_wide() {
        let body = MethodBuilder::new("A", "m", "(JI)J")
            .iload(2)
            .load(VarKind::Long, 0)
            .stack(StackOp::Dup2X1)
            .stack(StackOp::Pop2)
            .pop()
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        // one copy of the long goes below the int
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["lload 0", "lreturn"]);
    }

    #[test]
    fn test_dup2_x2_narrow() {
        let body = MethodBuilder::new("A", "m", "(IIII)I")
            .iload(0)
            .iload(1)
            .iload(2)
            .iload(3)
            .stack(StackOp::Dup2X2)
            .stack(StackOp::Pop2)
            .stack(StackOp::Pop2)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 2", "iload 3", "iadd", "ireturn"]);
    }

    #[test]
    fn test_dup2_x2_wide() {
        let body = MethodBuilder::new("A", "m", "(JJ)J")
            .load(VarKind::Long, 0)
            .load(VarKind::Long, 2)
            .stack(StackOp::Dup2X2)
            .stack(StackOp::Pop2)
            .stack(StackOp::Pop2)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["lload 2", "lreturn"]);
    }

    #[test]
    fn test_swap_reorders_loads() {
        let body = MethodBuilder::new("A", "m", "(II)I")
            .iload(0)
            .iload(1)
            .swap()
            .binary(BinaryOp::Sub, NumKind::Int)
            .ireturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(changed);
        assert_eq!(code, ["iload 1", "iload 0", "isub", "ireturn"]);
    }

    #[test]
    fn test_swap_of_call_is_kept() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .invokestatic("A", "next", "()I")
            .iload(0)
            .swap()
            .binary(BinaryOp::Sub, NumKind::Int)
            .ireturn()
            .build()
            .unwrap();
        let (changed, _) = normalize(body);
        assert!(!changed);
    }

    #[test]
    fn test_pop_of_call_is_kept() {
        let body = MethodBuilder::new("A", "m", "()V")
            .invokestatic("A", "next", "()I")
            .pop()
            .vreturn()
            .build()
            .unwrap();
        let (changed, code) = normalize(body);
        assert!(!changed);
        assert_eq!(code, ["invokestatic A.next()I", "pop", "return"]);
    }
}
