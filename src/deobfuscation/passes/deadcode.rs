//! Dead code elimination.
//!
//! Removes every instruction that cannot execute, drops exception ranges that no longer protect
//! anything, and re-anchors local variable ranges whose labels disappeared.
//!
//! Reachability comes from [`FlowGraph::reachable`]: a walk from the method entry over
//! fallthrough, jump, switch and exception edges. Because exception edges only start at
//! executable instructions inside a range, a handler is live exactly when something it protects
//! is live, and the traversal reaches its closure in one walk.
//!
//! # Example
//!
//! Before:
//! ```text
//!     goto L
//!     iconst_1
//!     pop
//! L:
//!     return
//! ```
//!
//! After:
//! ```text
//!     goto L
//! L:
//!     return
//! ```

use std::collections::HashSet;

use crate::{
    analysis::FlowGraph,
    assembly::{Insn, MethodBody},
    compiler::MethodPass,
    deobfuscation::MethodContext,
    Result,
};

/// Removes unreachable code from `body`. Returns `true` if anything was removed or repaired.
///
/// Kept even when unreachable: the trailing label, and labels still used by a surviving
/// exception range.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a jump or range label is not linked, or if a local
/// variable range points at something other than a label.
pub fn prune_unreachable(body: &mut MethodBody) -> Result<bool> {
    let graph = FlowGraph::build(body)?;
    let reachable = graph.reachable();
    let positions = graph.positions();

    let mut changed = false;

    let live_ranges: Vec<bool> = body
        .try_catch_blocks
        .iter()
        .map(|tcb| {
            let (Some(start), Some(end)) = (positions.of(tcb.start), positions.of(tcb.end)) else {
                return false;
            };
            (start..end).any(|pos| {
                reachable.contains(pos)
                    && positions
                        .at(pos)
                        .and_then(|id| body.instructions.get(id))
                        .is_some_and(|insn| !insn.is_meta())
            })
        })
        .collect();
    if live_ranges.iter().any(|live| !live) {
        let mut flags = live_ranges.into_iter();
        body.try_catch_blocks
            .retain(|_| flags.next().unwrap_or(true));
        changed = true;
    }

    let mut pinned: HashSet<_> = body.range_labels();
    if let Some(last) = body.instructions.last() {
        pinned.insert(last);
    }

    for pos in 0..graph.len() {
        if reachable.contains(pos) {
            continue;
        }
        let Some(id) = positions.at(pos) else {
            continue;
        };
        if matches!(body.instructions.get(id), Some(Insn::Label)) && pinned.contains(&id) {
            continue;
        }
        body.instructions.remove(id)?;
        changed = true;
    }

    if changed {
        body.repair_local_ranges()?;
    }
    Ok(changed)
}

/// Pass wrapper around [`prune_unreachable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodePass;

impl DeadCodePass {
    /// Pass name.
    pub const NAME: &'static str = "dead-code-removal";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MethodPass for DeadCodePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Removes unreachable instructions and exception ranges that protect nothing"
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        ctx.prune_unreachable()
    }
}
