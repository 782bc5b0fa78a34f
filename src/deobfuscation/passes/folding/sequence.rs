//! Sequence folding.
//!
//! For every instruction that consumes stack values, walk backwards collecting the straight-line
//! run of instructions that produced those values. When the run is self-contained and the frame
//! after the operation knows the result, the run is blanked and the operation becomes a single
//! constant push. Locals written inside the run get their final values re-stored in front of the
//! constant, so later reads are unaffected.
//!
//! When the result is unknown, binary operations with an identity operand (`x * 1`, `x | 0`,
//! `x & -1`, ...) are reduced to the other operand.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::{
    analysis::{AbstractValue, Evaluator, Frame, Frames},
    assembly::{BinaryOp, Constant, Insn, InsnId, MethodBody, NumKind},
    compiler::EventKind,
    deobfuscation::{
        passes::folding::{binary_arguments, BinaryArguments},
        MethodContext,
    },
    Result,
};

/// Verdict for one instruction visited by the backward scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Keep walking backwards.
    Continue,
    /// The collected run produces everything the operation consumes.
    Accept,
    /// The run cannot be isolated.
    Reject,
}

/// A candidate run, in program order.
#[derive(Debug, Default)]
struct Sequence {
    ids: Vec<InsnId>,
    /// Final value written to each local inside the run.
    writes: BTreeMap<u16, AbstractValue>,
    /// Net values pushed by the visited instructions, a `long` counting once.
    net: isize,
}

/// Backward scan over one body snapshot.
struct Scanner<'a> {
    body: &'a MethodBody,
    frames: &'a Frames,
    /// Labels entered by a jump, a switch or an exception.
    inbound: &'a HashSet<InsnId>,
    /// Instructions replaced since the frames were computed.
    rewritten: &'a HashSet<InsnId>,
}

impl Scanner<'_> {
    /// Collects the run ending at `op`, or `None` if it cannot be isolated.
    fn scan(&self, op: InsnId, value_return: bool) -> Option<Sequence> {
        let list = &self.body.instructions;
        let threshold = if value_return { 0 } else { 1 };
        let mut sequence = Sequence::default();
        let mut cursor = Some(op);
        while let Some(id) = cursor {
            match self.visit(&mut sequence, op, id, list.get(id)?, threshold) {
                ScanOutcome::Continue => cursor = list.prev(id),
                ScanOutcome::Accept => {
                    sequence.ids.reverse();
                    return Some(sequence);
                }
                ScanOutcome::Reject => return None,
            }
        }
        None
    }

    fn visit(
        &self,
        sequence: &mut Sequence,
        op: InsnId,
        id: InsnId,
        insn: &Insn,
        threshold: isize,
    ) -> ScanOutcome {
        match insn {
            Insn::Nop | Insn::Line(_) => return ScanOutcome::Continue,
            Insn::Label if self.inbound.contains(&id) => return ScanOutcome::Reject,
            Insn::Label => return ScanOutcome::Continue,
            _ => {}
        }
        let is_own_return = id == op && insn.is_return();
        if (insn.is_flow_control() && !is_own_return) || insn.has_side_effects() {
            return ScanOutcome::Reject;
        }

        match insn {
            Insn::Store(_, slot) => {
                let Some(value) = self
                    .frames
                    .at(id)
                    .and_then(|frame| frame.top(0))
                    .filter(|value| materialize(value).is_some())
                else {
                    return ScanOutcome::Reject;
                };
                sequence.writes.entry(*slot).or_insert_with(|| value.clone());
            }
            Insn::Iinc { slot, delta } => {
                let Some(current) = self
                    .frames
                    .at(id)
                    .and_then(|frame| frame.get_local(usize::from(*slot)).as_int())
                else {
                    return ScanOutcome::Reject;
                };
                sequence
                    .writes
                    .entry(*slot)
                    .or_insert(AbstractValue::Int(Some(current.wrapping_add(i32::from(*delta)))));
            }
            _ => {}
        }

        let Some(delta) = self.stack_delta(id, insn) else {
            return ScanOutcome::Reject;
        };
        sequence.net += delta;
        sequence.ids.push(id);
        if sequence.net >= threshold {
            ScanOutcome::Accept
        } else {
            ScanOutcome::Continue
        }
    }

    /// Values pushed minus values popped by `insn`.
    ///
    /// Frames are authoritative for instructions that have not been rewritten in this sub-pass.
    /// Control flow and fresh instructions fall back to the static effect.
    fn stack_delta(&self, id: InsnId, insn: &Insn) -> Option<isize> {
        value_delta(self.frames, self.rewritten, id, insn)
    }
}

/// Net values pushed by `insn`, from the frames when they still describe it.
fn value_delta(
    frames: &Frames,
    rewritten: &HashSet<InsnId>,
    id: InsnId,
    insn: &Insn,
) -> Option<isize> {
    if !insn.is_flow_control() && !rewritten.contains(&id) {
        if let (Some(before), Some(after)) = (frames.at(id), frames.after(id)) {
            return Some(after.stack_size() as isize - before.stack_size() as isize);
        }
    }
    insn.value_effect()
        .map(|effect| effect.produced as isize - effect.consumed as isize)
}

/// The constant that pushes `value`, including `null`.
fn materialize(value: &AbstractValue) -> Option<Constant> {
    value
        .to_constant()
        .or_else(|| value.is_null().then_some(Constant::Null))
}

/// Returns `true` if the run leans on stack values from before its first instruction, or does
/// not end in exactly one result.
///
/// Values are counted once whatever their width, so a widening conversion keeps its operand.
/// Shuffles are checked against the slots the run has pushed.
fn is_open(body: &MethodBody, frames: &Frames, ids: &[InsnId]) -> bool {
    let none = HashSet::new();
    let mut net = 0isize;
    let mut slots = 0isize;
    let mut consumed = 0isize;
    let mut produced = 0isize;
    for (id, insn) in ids
        .iter()
        .filter_map(|&id| body.instructions.get(id).map(|insn| (id, insn)))
    {
        if let Insn::Stack(op) = insn {
            if slots < op.depth() as isize {
                return true;
            }
        }
        let effect = match insn.value_effect() {
            Some(effect) => (effect.consumed as isize, effect.produced as isize),
            None => match value_delta(frames, &none, id, insn) {
                Some(delta) if delta < 0 => (-delta, 0),
                Some(delta) => (0, delta),
                None => return true,
            },
        };
        (consumed, produced) = effect;
        if consumed > net {
            return true;
        }
        net += produced - consumed;
        slots += insn.stack_effect().delta();
    }
    net > consumed || net != produced
}

/// Folds every self-contained computation whose result the frames know. Returns `true` if
/// anything changed.
///
/// # Errors
///
/// Returns an error if frames cannot be computed or the body is structurally damaged.
pub fn fold_sequences(ctx: &mut MethodContext<'_>) -> Result<bool> {
    let frames = ctx.frames()?;
    let inbound: HashSet<InsnId> = {
        let body = ctx.body();
        let mut labels: HashSet<InsnId> = body.flow_references().into_keys().collect();
        labels.extend(body.handler_labels());
        labels
    };
    let mut rewritten: HashSet<InsnId> = HashSet::new();
    let mut changed = false;

    for op in ctx.body().instructions.ids() {
        let Some(insn) = ctx.body().instructions.get(op) else {
            continue;
        };
        if insn.size_consumed() == 0 || matches!(insn, Insn::Stack(_)) || rewritten.contains(&op) {
            continue;
        }
        let value_return = matches!(insn, Insn::Return(Some(_)));
        let Some(frame) = frames.at(op) else {
            continue;
        };
        let after = frames.after(op);
        if !value_return && !after.is_some_and(|next| next.stack_size() > 0) {
            continue;
        }

        let scanner = Scanner {
            body: ctx.body(),
            frames: &frames,
            inbound: &inbound,
            rewritten: &rewritten,
        };
        let scanned = scanner
            .scan(op, value_return)
            .filter(|sequence| sequence.ids.len() >= 2 && !is_open(ctx.body(), &frames, &sequence.ids));
        let Some(mut sequence) = scanned else {
            continue;
        };
        if value_return {
            sequence.ids.pop();
            if sequence.ids.len() < 2 {
                continue;
            }
        }

        let top = if value_return {
            frame.top(0)
        } else {
            after.and_then(|next| next.top(0))
        };
        let Some(mut value) = top.cloned() else {
            continue;
        };
        let next_is_label = ctx
            .body()
            .instructions
            .next(op)
            .and_then(|next| ctx.body().instructions.get(next))
            .is_some_and(Insn::is_label);
        if !value_return && materialize(&value).is_none() && next_is_label {
            value = evaluate(ctx, &frames, op, &sequence.ids, &rewritten, value);
        }

        match materialize(&value) {
            Some(constant) => {
                let Some(writes) = sequence
                    .writes
                    .iter()
                    .map(|(&slot, written)| {
                        Some((Insn::Const(materialize(written)?), Insn::Store(written.kind()?, slot)))
                    })
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                let anchor = if value_return {
                    let Some(&last) = sequence.ids.last() else {
                        continue;
                    };
                    last
                } else {
                    op
                };

                let list = &mut ctx.body_mut().instructions;
                for &id in &sequence.ids {
                    list.set(id, Insn::Nop)?;
                }
                list.set(anchor, Insn::Const(constant.clone()))?;
                if !value_return {
                    for (push, store) in writes {
                        list.insert_before(op, push)?;
                        list.insert_before(op, store)?;
                    }
                }
                rewritten.insert(anchor);
                ctx.record(EventKind::ConstantFolded)
                    .maybe_location(frames.position(op))
                    .message(format!("{} instructions -> {constant}", sequence.ids.len()));
                changed = true;
            }
            None => {
                if fold_identity(ctx, op, frame)? {
                    ctx.record(EventKind::ConstantFolded)
                        .maybe_location(frames.position(op))
                        .message("removed identity operation");
                    changed = true;
                }
            }
        }
    }
    Ok(changed)
}

/// Runs the sequence on the frame before it.
///
/// Frames at a merge label may lose a value that is constant along the fallthrough path; direct
/// evaluation recovers it. The fallback is returned whenever evaluation fails or yields a
/// different kind.
fn evaluate(
    ctx: &MethodContext<'_>,
    frames: &Frames,
    op: InsnId,
    ids: &[InsnId],
    rewritten: &HashSet<InsnId>,
    fallback: AbstractValue,
) -> AbstractValue {
    let Some(&first) = ids.first() else {
        return fallback;
    };
    if rewritten.contains(&first) {
        return fallback;
    }
    let Some(start) = frames.at(first) else {
        return fallback;
    };
    let list = &ctx.body().instructions;
    let evaluator = Evaluator::new(ctx.analysis().interpreter(), ids.len() + 10);
    match evaluator.evaluate_sequence(ids.iter().filter_map(|&id| list.get(id)), start) {
        Ok(state) => state
            .top(0)
            .filter(|result| result.kind() == fallback.kind())
            .cloned()
            .unwrap_or(fallback),
        Err(failure) => {
            debug!("sequence evaluation in {} failed: {}", ctx.key(), failure);
            ctx.record(EventKind::EvaluationAborted)
                .maybe_location(frames.position(op))
                .message(failure.to_string());
            fallback
        }
    }
}

/// Returns `true` if `value` leaves the other operand of `op` unchanged when it is on the
/// given side.
fn is_identity(op: BinaryOp, kind: NumKind, value: &AbstractValue, right: bool) -> bool {
    if op.is_shift() {
        return right && value.as_int() == Some(0);
    }
    let commutative = matches!(
        op,
        BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
    );
    if !right && !commutative {
        return false;
    }
    match kind {
        NumKind::Int => match op {
            BinaryOp::And => value.as_int() == Some(-1),
            BinaryOp::Mul => value.as_int() == Some(1),
            BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor => value.as_int() == Some(0),
            _ => false,
        },
        NumKind::Long => match op {
            BinaryOp::And => value.as_long() == Some(-1),
            BinaryOp::Mul => value.as_long() == Some(1),
            BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor => value.as_long() == Some(0),
            _ => false,
        },
        // `x + 0.0` turns -0.0 into 0.0, so only multiplication by one qualifies
        NumKind::Float => op == BinaryOp::Mul && value.as_float() == Some(1.0),
        NumKind::Double => op == BinaryOp::Mul && value.as_double() == Some(1.0),
    }
}

/// Drops a binary operation and its identity operand.
fn fold_identity(ctx: &mut MethodContext<'_>, op: InsnId, frame: &Frame) -> Result<bool> {
    let list = &ctx.body().instructions;
    let Some(insn) = list.get(op) else {
        return Ok(false);
    };
    let Insn::Binary(bop, kind) = *insn else {
        return Ok(false);
    };
    let (Some(top), Some(below)) = (frame.top(0), frame.top(1)) else {
        return Ok(false);
    };
    let right = if is_identity(bop, kind, top, true) {
        true
    } else if is_identity(bop, kind, below, false) {
        false
    } else {
        return Ok(false);
    };
    let Some(args) = insn
        .opcode()
        .and_then(|opcode| binary_arguments(list, list.prev(op), opcode))
        .filter(BinaryArguments::is_direct)
    else {
        return Ok(false);
    };
    if args.is_wide() {
        return Ok(false);
    }
    let redundant = if right { args.right.insn } else { args.left.insn };
    if !list.get(redundant).is_some_and(Insn::is_pure_producer) {
        return Ok(false);
    }

    let list = &mut ctx.body_mut().instructions;
    list.set(op, Insn::Nop)?;
    list.set(redundant, Insn::Nop)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::{ClassHierarchy, ValueInterpreter},
        assembly::{Condition, MethodBuilder, VarKind},
        deobfuscation::{AnalysisContext, EngineConfig},
    };

    fn analysis() -> AnalysisContext {
        AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None)
    }

    fn real(body: &MethodBody) -> Vec<String> {
        body.instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta() && !matches!(insn, Insn::Nop))
            .map(|(_, insn)| insn.to_string())
            .collect()
    }

    #[test]
    fn test_is_open() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iconst(1)
            .iconst(2)
            .iadd()
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let frames = Frames::compute(&ValueInterpreter::new(), &body).unwrap();
        let ids = body.instructions.ids();
        assert!(!is_open(&body, &frames, &ids[..3]));
        // the second add reaches below the run
        assert!(is_open(&body, &frames, &ids[1..4]));
    }

    #[test]
    fn test_widening_run_is_closed() {
        let body = MethodBuilder::new("A", "m", "()J")
            .iconst(5)
            .insn(Insn::Convert(NumKind::Int, NumKind::Long))
            .lconst(1)
            .binary(BinaryOp::Add, NumKind::Long)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let frames = Frames::compute(&ValueInterpreter::new(), &body).unwrap();
        let ids = body.instructions.ids();
        assert!(!is_open(&body, &frames, &ids[..2]));
        assert!(!is_open(&body, &frames, &ids[..4]));
        // the conversion alone reads an int pushed outside the run
        assert!(is_open(&body, &frames, &ids[1..2]));
        assert!(is_open(&body, &frames, &ids[1..4]));
    }

    #[test]
    fn test_identity_table() {
        let one = AbstractValue::Int(Some(1));
        let zero = AbstractValue::Int(Some(0));
        assert!(is_identity(BinaryOp::Mul, NumKind::Int, &one, true));
        assert!(is_identity(BinaryOp::Mul, NumKind::Int, &one, false));
        assert!(is_identity(BinaryOp::Shl, NumKind::Long, &zero, true));
        assert!(!is_identity(BinaryOp::Shl, NumKind::Int, &zero, false));
        assert!(!is_identity(BinaryOp::Sub, NumKind::Int, &zero, false));
        assert!(!is_identity(BinaryOp::Add, NumKind::Float, &AbstractValue::Float(Some(0.0)), true));
        assert!(is_identity(BinaryOp::And, NumKind::Long, &AbstractValue::Long(Some(-1)), true));
    }

    #[test]
    fn test_jump_target_breaks_sequence() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iconst(2)
            .iload(0)
            .jump(Condition::Eq, "skip")
            .label("skip")
            .iconst(3)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        // the sum is known on both paths, but its left operand is pushed before the merge
        assert!(!fold_sequences(&mut ctx).unwrap());
    }

    #[test]
    fn test_iinc_value_is_restored() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(4)
            .istore(0)
            .iload(0)
            .iinc(0, 3)
            .iload(0)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        assert!(fold_sequences(&mut ctx).unwrap());
        assert_eq!(
            real(ctx.body()),
            ["iconst_4", "istore 0", "bipush 7", "istore 0", "bipush 11", "ireturn"]
        );
    }

    #[test]
    fn test_widened_sum_folds() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "()J")
            .iconst(5)
            .insn(Insn::Convert(NumKind::Int, NumKind::Long))
            .lconst(1)
            .binary(BinaryOp::Add, NumKind::Long)
            .store(VarKind::Long, 0)
            .load(VarKind::Long, 0)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        assert!(fold_sequences(&mut ctx).unwrap());
        assert_eq!(real(ctx.body()), ["ldc2_w 6L", "lstore 0", "lload 0", "lreturn"]);
    }

    #[test]
    fn test_widened_store_folds() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "()V")
            .iconst(5)
            .insn(Insn::Convert(NumKind::Int, NumKind::Long))
            .store(VarKind::Long, 0)
            .vreturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        assert!(fold_sequences(&mut ctx).unwrap());
        assert_eq!(real(ctx.body()), ["ldc2_w 5L", "lstore 0", "return"]);
    }

    #[test]
    fn test_narrowed_value_folds() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "()V")
            .lconst(1)
            .insn(Insn::Convert(NumKind::Long, NumKind::Int))
            .istore(0)
            .vreturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        assert!(fold_sequences(&mut ctx).unwrap());
        assert_eq!(real(ctx.body()), ["iconst_1", "istore 0", "return"]);
    }
}
