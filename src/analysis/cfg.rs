//! Instruction-level control flow graph.
//!
//! Nodes are instruction *positions* of a [`MethodBody`] snapshot; edges are normal flow
//! (fallthrough, jumps, switch cases) plus exceptional flow from every executable instruction
//! inside an exception range to the range's handler.
//!
//! # Edge Types
//!
//! - **Fallthrough**: to the next instruction, unless the instruction is terminal
//! - **Jump**: to the target of `goto` or a conditional jump
//! - **Switch**: to each case and the default
//! - **Exception**: from a protected, non-metadata instruction to its handler
//!
//! Reachability from the method entry over all four edge kinds is exactly the dead-code
//! criterion: a handler becomes live once any instruction it protects is live.

use crate::{
    assembly::{MethodBody, Positions},
    utils::BitSet,
    Result,
};

/// Classification of a flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Sequential flow to the next instruction.
    Fallthrough,
    /// Jump to a label.
    Jump,
    /// Switch case or default.
    Switch,
    /// Exceptional transfer to a handler.
    Exception,
}

/// Successor and predecessor lists over instruction positions.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    positions: Positions,
    successors: Vec<Vec<(usize, EdgeKind)>>,
    predecessors: Vec<Vec<usize>>,
}

impl FlowGraph {
    /// Builds the graph for the current state of `body`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a jump target or range label is not linked.
    pub fn build(body: &MethodBody) -> Result<Self> {
        let positions = body.positions();
        let len = positions.len();
        let mut successors: Vec<Vec<(usize, EdgeKind)>> = vec![Vec::new(); len];

        let resolve = |id| {
            positions
                .of(id)
                .ok_or_else(|| malformed_error!("label {} is not part of {}", id, body.key()))
        };

        for (pos, id) in positions.order().iter().enumerate() {
            let Some(insn) = body.instructions.get(*id) else {
                continue;
            };
            let kind = if insn.is_switch() {
                EdgeKind::Switch
            } else {
                EdgeKind::Jump
            };
            for target in insn.jump_targets() {
                let to = resolve(target)?;
                if !successors[pos].contains(&(to, kind)) {
                    successors[pos].push((to, kind));
                }
            }
            if !insn.is_terminal() && pos + 1 < len {
                successors[pos].push((pos + 1, EdgeKind::Fallthrough));
            }
        }

        for tcb in &body.try_catch_blocks {
            let start = resolve(tcb.start)?;
            let end = resolve(tcb.end)?;
            let handler = resolve(tcb.handler)?;
            for pos in start..end.min(len) {
                let executable = positions
                    .at(pos)
                    .and_then(|id| body.instructions.get(id))
                    .is_some_and(|insn| !insn.is_meta());
                let edge = (handler, EdgeKind::Exception);
                if executable && !successors[pos].contains(&edge) {
                    successors[pos].push(edge);
                }
            }
        }

        let mut predecessors = vec![Vec::new(); len];
        for (from, succs) in successors.iter().enumerate() {
            for &(to, _) in succs {
                if !predecessors[to].contains(&from) {
                    predecessors[to].push(from);
                }
            }
        }

        Ok(Self {
            positions,
            successors,
            predecessors,
        })
    }

    /// The position snapshot the graph was built over.
    #[must_use]
    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    /// Returns `true` for an empty method.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Outgoing edges of `pos`.
    #[must_use]
    pub fn edges(&self, pos: usize) -> &[(usize, EdgeKind)] {
        self.successors.get(pos).map_or(&[], Vec::as_slice)
    }

    /// Successor positions of `pos`.
    pub fn successors(&self, pos: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges(pos).iter().map(|&(to, _)| to)
    }

    /// Predecessor positions of `pos`.
    #[must_use]
    pub fn predecessors(&self, pos: usize) -> &[usize] {
        self.predecessors.get(pos).map_or(&[], Vec::as_slice)
    }

    /// Positions reachable from the method entry.
    #[must_use]
    pub fn reachable(&self) -> BitSet {
        let mut visited = BitSet::new(self.len());
        if self.is_empty() {
            return visited;
        }
        let mut stack = vec![0usize];
        visited.insert(0);
        while let Some(pos) = stack.pop() {
            for next in self.successors(pos) {
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        visited
    }
}
