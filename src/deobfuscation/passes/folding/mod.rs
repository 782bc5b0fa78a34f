//! Constant and stack-operation folding.
//!
//! The pass runs two frame-driven sub-passes per round until neither finds work:
//!
//! 1. [`stack`] rewrites stack shuffles (`dup*`, `pop*`, `swap`) into explicit producers, so
//!    that values flow in a straight line from where they are pushed to where they are used.
//! 2. [`sequence`] walks backwards from every value-consuming operation to find the run of
//!    instructions that computes its operands, and replaces the run with a single constant when
//!    the frames know the result.
//!
//! Both sub-passes blank instructions with `nop` rather than unlinking them, so that handles
//! taken from the frame snapshot stay valid for the rest of the sub-pass. The `nop`s are swept
//! at the end of every productive round.
//!
//! # Example
//!
//! Before:
//! ```text
//! iconst_2
//! dup
//! imul
//! iconst_3
//! iadd
//! ireturn
//! ```
//!
//! After:
//! ```text
//! bipush 7
//! ireturn
//! ```

mod sequence;
mod stack;

pub use sequence::{fold_sequences, ScanOutcome};
pub use stack::normalize_stack;

use crate::{
    assembly::{opcodes, FieldOp, Insn, InsnId, InsnList, StackOp},
    compiler::MethodPass,
    deobfuscation::{passes::GotoInliningPass, MethodContext},
    Result,
};

/// An instruction that supplies one operand, and what lies between it and its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Argument {
    /// The producing instruction.
    pub insn: InsnId,
    /// Skipped `swap`/`pop`/`pop2` instructions and the producers whose values they discard.
    pub intermediates: Vec<InsnId>,
}

impl Argument {
    fn same_as(&self, other: &Argument) -> bool {
        self.insn == other.insn
    }

    /// Returns `true` if this argument's instruction supplies *both* operands of `opcode`.
    fn provides_both(&self, list: &InsnList, opcode: u8) -> bool {
        let Some((left, right)) = opcodes::binary_arg_sizes(opcode) else {
            return false;
        };
        let Some(insn) = list.get(self.insn) else {
            return false;
        };
        insn.size_produced() == left + right
            || (matches!(insn, Insn::Stack(StackOp::Dup2)) && left == 1 && right == 1)
    }
}

/// The two operands of a binary operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BinaryArguments {
    /// Deeper (left) operand.
    pub left: Argument,
    /// Top (right) operand.
    pub right: Argument,
}

impl BinaryArguments {
    /// Returns `true` if a single wide producer supplies both operands.
    pub fn is_wide(&self) -> bool {
        self.left.same_as(&self.right)
    }

    /// Returns `true` if nothing sits between the producers and the consumer.
    pub fn is_direct(&self) -> bool {
        self.left.intermediates.is_empty() && self.right.intermediates.is_empty()
    }

    /// Blanks both producers.
    pub fn blank(&self, list: &mut InsnList) -> Result<()> {
        list.set(self.right.insn, Insn::Nop)?;
        if !self.is_wide() {
            list.set(self.left.insn, Insn::Nop)?;
        }
        Ok(())
    }
}

/// Returns `true` for instructions that push one value and may be evaluated more than once or
/// moved without changing behaviour.
pub(crate) fn is_clonable_producer(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Const(_) | Insn::Load(..) | Insn::Field(FieldOp::GetStatic, _)
    )
}

/// Walks back from `start` (inclusive) to the instruction producing the value on top of the
/// stack at that point.
///
/// `nop`s and line numbers are skipped. `pop`/`pop2` discard the producers right below them,
/// which are skipped too; `swap` is recorded and left to [`binary_arguments`] to interpret.
/// The instruction finally reached must be a value producer.
pub(crate) fn collect_argument(list: &InsnList, start: Option<InsnId>) -> Option<Argument> {
    let mut cursor = start;
    let mut intermediates = Vec::new();
    let mut discard = 0usize;
    let mut swapped = false;
    while let Some(id) = cursor {
        let insn = list.get(id)?;
        match insn {
            Insn::Nop | Insn::Line(_) => {}
            Insn::Stack(StackOp::Pop | StackOp::Pop2) if !swapped => {
                intermediates.push(id);
                discard += insn.size_consumed();
            }
            Insn::Stack(StackOp::Swap) if discard == 0 => {
                intermediates.push(id);
                swapped = true;
            }
            _ if discard > 0 && is_clonable_producer(insn) => {
                intermediates.push(id);
                discard = discard.checked_sub(insn.size_produced())?;
            }
            _ => break,
        }
        cursor = list.prev(id);
    }
    let id = cursor?;
    if discard > 0 || !list.get(id)?.is_value_producer() {
        return None;
    }
    Some(Argument { insn: id, intermediates })
}

/// Resolves both operands of the binary operation `opcode` whose top operand is produced at or
/// before `before`.
pub(crate) fn binary_arguments(
    list: &InsnList,
    before: Option<InsnId>,
    opcode: u8,
) -> Option<BinaryArguments> {
    let mut right = collect_argument(list, before)?;
    let mut left = if right.provides_both(list, opcode) {
        right.clone()
    } else {
        let left = collect_argument(list, list.prev(right.insn))?;
        if left.provides_both(list, opcode) {
            return None;
        }
        left
    };

    let swaps = right
        .intermediates
        .iter()
        .filter(|&&id| matches!(list.get(id), Some(Insn::Stack(StackOp::Swap))))
        .count();
    if swaps % 2 == 1 {
        if left.same_as(&right) {
            return None;
        }
        std::mem::swap(&mut left, &mut right);
    }
    Some(BinaryArguments { left, right })
}

/// Folds stack shuffles and constant expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    /// Pass name.
    pub const NAME: &'static str = "constant-folding";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Folds stack shuffles and computations on known values into constants"
    }

    fn recommended_predecessors(&self) -> &'static [&'static str] {
        &[GotoInliningPass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        let mut changed = false;
        for _ in 0..ctx.config().max_pass_rounds.max(1) {
            let normalized = normalize_stack(ctx)?;
            let folded = fold_sequences(ctx)?;
            if !normalized && !folded {
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
        assembly::{MethodBody, MethodBuilder, VarKind},
        compiler::EventKind,
        deobfuscation::{AnalysisContext, EngineConfig},
    };

    fn analysis() -> AnalysisContext {
        AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None)
    }

    fn real(body: &MethodBody) -> Vec<String> {
        body.instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| insn.to_string())
            .collect()
    }

    fn fold(body: MethodBody) -> (bool, MethodBody) {
        let analysis = analysis();
        let mut ctx = MethodContext::new(body, ConstantFoldingPass::NAME, &analysis);
        let changed = ConstantFoldingPass.run_on_method(&mut ctx).unwrap();
        assert!(!ConstantFoldingPass.run_on_method(&mut ctx).unwrap());
        (changed, ctx.into_body())
    }

    #[test]
    fn test_collect_argument_skips_discarded_values() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(1)
            .iconst(2)
            .nop()
            .pop()
            .ireturn()
            .build()
            .unwrap();
        let ids = body.instructions.ids();
        // `pop` throws away the 2, so the top value comes from the 1
        let arg = collect_argument(&body.instructions, Some(ids[3])).unwrap();
        assert_eq!(arg.insn, ids[0]);
        assert_eq!(arg.intermediates, vec![ids[3], ids[1]]);
    }

    #[test]
    fn test_binary_arguments_wide_producer() {
        let body = MethodBuilder::new("A", "m", "()V")
            .lconst(7)
            .stack(StackOp::Pop2)
            .vreturn()
            .build()
            .unwrap();
        let ids = body.instructions.ids();
        let args = binary_arguments(&body.instructions, Some(ids[0]), opcodes::POP2).unwrap();
        assert!(args.is_wide());
    }

    #[test]
    fn test_scenario_add() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(2)
            .iconst(3)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, body) = fold(body);
        assert!(changed);
        assert_eq!(real(&body), ["iconst_5", "ireturn"]);
    }

    #[test]
    fn test_dup_square() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(2)
            .dup()
            .imul()
            .iconst(3)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (_, body) = fold(body);
        assert_eq!(real(&body), ["bipush 7", "ireturn"]);
    }

    #[test]
    fn test_unknown_operand_is_kept() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .iconst(3)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, body) = fold(body);
        assert!(!changed);
        assert_eq!(real(&body), ["iload 0", "iconst_3", "iadd", "ireturn"]);
    }

    #[test]
    fn test_redundant_operand_removed() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .iconst(1)
            .imul()
            .iconst(0)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (changed, body) = fold(body);
        assert!(changed);
        assert_eq!(real(&body), ["iload 0", "ireturn"]);
    }

    #[test]
    fn test_store_inside_sequence_is_kept() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(2)
            .dup()
            .istore(0)
            .iconst(3)
            .iadd()
            .iload(0)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let (_, body) = fold(body);
        let code = real(&body);
        assert_eq!(code.last().map(String::as_str), Some("ireturn"));
        assert!(code.contains(&"istore 0".to_string()));
        assert!(code.contains(&"bipush 7".to_string()));
    }

    #[test]
    fn test_pop_of_constant_removed() {
        let body = MethodBuilder::new("A", "m", "()V")
            .iconst(4)
            .pop()
            .vreturn()
            .build()
            .unwrap();
        let (changed, body) = fold(body);
        assert!(changed);
        assert_eq!(real(&body), ["return"]);
    }

    #[test]
    fn test_pop_of_call_is_kept() {
        let body = MethodBuilder::new("A", "m", "()V")
            .invokestatic("A", "next", "()I")
            .pop()
            .vreturn()
            .build()
            .unwrap();
        let (changed, _) = fold(body);
        assert!(!changed);
    }

    #[test]
    fn test_swap_reorders_producers() {
        let body = MethodBuilder::new("A", "m", "(II)I")
            .iload(0)
            .iload(1)
            .swap()
            .binary(crate::assembly::BinaryOp::Sub, crate::assembly::NumKind::Int)
            .ireturn()
            .build()
            .unwrap();
        let (changed, body) = fold(body);
        assert!(changed);
        assert_eq!(real(&body), ["iload 1", "iload 0", "isub", "ireturn"]);
    }

    #[test]
    fn test_records_events() {
        let analysis = analysis();
        let body = MethodBuilder::new("A", "m", "()J")
            .lconst(2)
            .lconst(3)
            .binary(crate::assembly::BinaryOp::Mul, crate::assembly::NumKind::Long)
            .insn(Insn::Return(Some(VarKind::Long)))
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, ConstantFoldingPass::NAME, &analysis);
        assert!(ConstantFoldingPass.run_on_method(&mut ctx).unwrap());
        assert!(analysis.events.has(EventKind::ConstantFolded));
        assert_eq!(real(ctx.body()), ["ldc2_w 6L", "lreturn"]);
    }
}
