//! Duplicate handler merging.
//!
//! Obfuscators that wrap every statement in its own exception range also copy the handler body
//! once per range. When two handler blocks are identical, the earlier one is emptied and jumps to
//! the later one.

use std::collections::HashSet;

use crate::{
    assembly::{Insn, InsnId, MethodBody},
    compiler::{EventKind, MethodPass},
    deobfuscation::{
        passes::{DeadCodePass, RedundantTryCatchPass},
        MethodContext,
    },
    Result,
};

/// Smallest handler block worth merging, in real instructions.
pub const MIN_BLOCK_SIZE: usize = 4;

/// A handler block: its entry label and every instruction up to its terminal instruction.
#[derive(Debug)]
struct HandlerBlock {
    entry: InsnId,
    position: usize,
    /// Every instruction after the entry, labels included.
    members: Vec<InsnId>,
    /// Real instructions, compared structurally.
    code: Vec<Insn>,
}

impl HandlerBlock {
    fn collect(body: &MethodBody, entry: InsnId, position: usize) -> Option<Self> {
        let list = &body.instructions;
        let mut members = Vec::new();
        let mut code = Vec::new();
        let mut cursor = list.next(entry);
        while let Some(id) = cursor {
            let insn = list.get(id)?;
            members.push(id);
            if !insn.is_meta() && !matches!(insn, Insn::Nop) {
                code.push(insn.clone());
            }
            if insn.is_flow_control() {
                // a conditional exit would fall through into unrelated code
                return insn.is_terminal().then_some(Self {
                    entry,
                    position,
                    members,
                    code,
                });
            }
            cursor = list.next(id);
        }
        None
    }

    /// Returns `true` if any jump, switch or other handler enters the block anywhere, or the
    /// block's entry is also the target of a jump.
    fn has_external_entry(&self, body: &MethodBody) -> bool {
        let labels: HashSet<InsnId> = self
            .members
            .iter()
            .copied()
            .chain(std::iter::once(self.entry))
            .collect();
        let handler_inside = body
            .try_catch_blocks
            .iter()
            .any(|tcb| tcb.handler != self.entry && labels.contains(&tcb.handler));
        handler_inside
            || body
                .instructions
                .iter()
                .flat_map(|(_, insn)| insn.jump_targets())
                .any(|target| labels.contains(&target))
    }
}

/// Redirects handler blocks to a later identical handler block. Returns the number of merged
/// blocks.
///
/// # Errors
///
/// Returns an error if the body is structurally damaged.
pub fn merge_duplicate_handlers(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let body = ctx.body();
    if body.try_catch_blocks.len() < 2 {
        return Ok(0);
    }
    let positions = body.positions();

    let mut seen = HashSet::new();
    let mut blocks: Vec<HandlerBlock> = body
        .try_catch_blocks
        .iter()
        .filter(|tcb| seen.insert(tcb.handler))
        .filter_map(|tcb| {
            let position = positions.of(tcb.handler)?;
            HandlerBlock::collect(body, tcb.handler, position)
        })
        .filter(|block| block.code.len() >= MIN_BLOCK_SIZE && !block.has_external_entry(body))
        .collect();
    blocks.sort_by_key(|block| block.position);

    let mut merges = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        if let Some(later) = blocks[index + 1..]
            .iter()
            .rev()
            .find(|later| later.code == block.code)
        {
            merges.push((index, later.entry));
        }
    }
    if merges.is_empty() {
        return Ok(0);
    }

    let list = &mut ctx.body_mut().instructions;
    for &(index, target) in &merges {
        let block = &blocks[index];
        let mut redirected = false;
        for &id in &block.members {
            if list.get(id).is_some_and(Insn::is_meta) {
                continue;
            }
            if redirected {
                list.set(id, Insn::Nop)?;
            } else {
                list.set(id, Insn::Goto(target))?;
                redirected = true;
            }
        }
    }
    ctx.body_mut().remove_nops();
    for &(index, _) in &merges {
        let block = &blocks[index];
        ctx.record(EventKind::HandlerMerged)
            .location(block.position)
            .message(format!(
                "handler of {} instructions merged into an identical handler",
                block.code.len()
            ));
    }
    ctx.prune_unreachable()?;
    Ok(merges.len())
}

/// Merges structurally identical exception handler blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateCatchPass;

impl DuplicateCatchPass {
    /// Pass name.
    pub const NAME: &'static str = "duplicate-catch-merging";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for DuplicateCatchPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Redirects duplicated exception handler blocks to a single copy"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DeadCodePass::NAME]
    }

    fn recommended_predecessors(&self) -> &'static [&'static str] {
        &[RedundantTryCatchPass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        Ok(merge_duplicate_handlers(ctx)? > 0)
    }
}
