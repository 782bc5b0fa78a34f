//! Live local slot analysis.
//!
//! A local slot is *live* at a program point if some path from that point reads the slot before
//! writing it. The analysis works at instruction granularity over the [`FlowGraph`], including
//! exceptional edges into handlers, so a value that a handler reads stays live throughout the
//! protected range.
//!
//! # Algorithm
//!
//! This is a backward data flow analysis solved with a worklist:
//!
//! - `GEN[i]` = the slot read by `i` (loads, `iinc`)
//! - `KILL[i]` = the slots overwritten by `i` (stores, `iinc`; a wide store kills two)
//! - `OUT[i]` = ∪{IN[s] | s is a successor of i}
//! - `IN[i]` = GEN[i] ∪ (OUT[i] - KILL[i])
//!
//! `iinc` both reads and writes its slot, so it is live on entry whenever it executes.

use std::collections::VecDeque;

use crate::{
    analysis::FlowGraph,
    assembly::{Insn, InsnId, MethodBody},
    utils::BitSet,
    Result,
};

/// Live-in and live-out slot sets per instruction position.
#[derive(Debug, Clone)]
pub struct Liveness {
    graph: FlowGraph,
    live_in: Vec<BitSet>,
    live_out: Vec<BitSet>,
}

impl Liveness {
    /// Computes liveness for `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow graph cannot be built.
    pub fn compute(body: &MethodBody) -> Result<Self> {
        let graph = FlowGraph::build(body)?;
        let len = graph.len();
        let slots = local_count(body);

        let mut gen = Vec::with_capacity(len);
        let mut kill = Vec::with_capacity(len);
        for id in graph.positions().order() {
            let (g, k) = body
                .instructions
                .get(*id)
                .map_or_else(|| (BitSet::new(slots), BitSet::new(slots)), |i| transfer_sets(i, slots));
            gen.push(g);
            kill.push(k);
        }

        let mut live_in = vec![BitSet::new(slots); len];
        let mut live_out = vec![BitSet::new(slots); len];
        let mut queued = BitSet::full(len);
        let mut worklist: VecDeque<usize> = (0..len).rev().collect();

        while let Some(pos) = worklist.pop_front() {
            queued.remove(pos);

            let mut out = BitSet::new(slots);
            for succ in graph.successors(pos) {
                out.union_with(&live_in[succ]);
            }

            let mut incoming = out.clone();
            incoming.difference_with(&kill[pos]);
            incoming.union_with(&gen[pos]);
            live_out[pos] = out;

            if incoming != live_in[pos] {
                live_in[pos] = incoming;
                for &pred in graph.predecessors(pos) {
                    if queued.insert(pred) {
                        worklist.push_back(pred);
                    }
                }
            }
        }

        Ok(Self {
            graph,
            live_in,
            live_out,
        })
    }

    /// The graph the analysis ran on.
    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Slots live before the instruction at `pos`.
    #[must_use]
    pub fn live_in(&self, pos: usize) -> Option<&BitSet> {
        self.live_in.get(pos)
    }

    /// Slots live after the instruction at `pos`.
    #[must_use]
    pub fn live_out(&self, pos: usize) -> Option<&BitSet> {
        self.live_out.get(pos)
    }

    /// Returns `true` if `slot` is live after `id`.
    #[must_use]
    pub fn is_live_after(&self, id: InsnId, slot: u16) -> bool {
        self.graph
            .positions()
            .of(id)
            .and_then(|pos| self.live_out(pos))
            .is_some_and(|set| set.contains(usize::from(slot)))
    }
}

/// Number of slots the analysis must track.
fn local_count(body: &MethodBody) -> usize {
    body.instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            Insn::Store(kind, slot) => Some(usize::from(*slot) + kind.size()),
            other => other.reads_local().map(|slot| usize::from(slot) + 1),
        })
        .chain([usize::from(body.max_locals)])
        .max()
        .unwrap_or(0)
}

fn transfer_sets(insn: &Insn, slots: usize) -> (BitSet, BitSet) {
    let mut gen = BitSet::new(slots);
    let mut kill = BitSet::new(slots);
    if let Some(slot) = insn.reads_local() {
        gen.insert(usize::from(slot));
    }
    match insn {
        Insn::Store(kind, slot) => {
            let slot = usize::from(*slot);
            for s in slot..slot + kind.size() {
                kill.insert(s);
            }
        }
        Insn::Iinc { slot, .. } => {
            kill.insert(usize::from(*slot));
        }
        _ => {}
    }
    (gen, kill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Condition, MethodBuilder};

    #[test]
    fn test_straight_line() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(1)
            .istore(0)
            .iconst(2)
            .istore(1)
            .iload(0)
            .ireturn()
            .build()
            .unwrap();
        let live = Liveness::compute(&body).unwrap();
        // slot 0 is read later, slot 1 never
        assert!(live.live_out(1).unwrap().contains(0));
        assert!(!live.live_out(3).unwrap().contains(1));
        assert!(live.live_in(4).unwrap().contains(0));
        assert!(!live.live_in(0).unwrap().contains(0));
    }

    #[test]
    fn test_loop_keeps_counter_live() {
        let body = MethodBuilder::new("A", "m", "(I)V")
            .label("top")
            .iinc(0, -1)
            .iload(0)
            .jump(Condition::Gt, "top")
            .vreturn()
            .build()
            .unwrap();
        let live = Liveness::compute(&body).unwrap();
        for pos in 0..3 {
            assert!(live.live_in(pos).unwrap().contains(0), "slot 0 live at {pos}");
        }
        // the back edge keeps the counter live across the branch, the return reads nothing
        assert!(live.live_out(3).unwrap().contains(0));
        assert!(!live.live_in(4).unwrap().contains(0));
        assert!(live.live_out(4).unwrap().is_empty());
    }

    #[test]
    fn test_handler_reads_keep_slot_live() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(5)
            .istore(0)
            .label("s")
            .invokestatic("A", "f", "()V")
            .label("e")
            .iconst(0)
            .ireturn()
            .label("h")
            .pop()
            .iload(0)
            .ireturn()
            .try_catch("s", "e", "h", None)
            .build()
            .unwrap();
        let live = Liveness::compute(&body).unwrap();
        let store = body.positions().at(1).unwrap();
        assert!(live.is_live_after(store, 0));
    }

    #[test]
    fn test_equations_hold() {
        let body = MethodBuilder::new("A", "m", "(II)I")
            .iload(0)
            .jump(Condition::Eq, "b")
            .iload(1)
            .istore(2)
            .goto("j")
            .label("b")
            .iconst(3)
            .istore(2)
            .label("j")
            .iload(2)
            .ireturn()
            .build()
            .unwrap();
        let live = Liveness::compute(&body).unwrap();
        let graph = live.graph();
        for pos in 0..graph.len() {
            let mut out = BitSet::new(live.live_out(pos).unwrap().len());
            for s in graph.successors(pos) {
                out.union_with(live.live_in(s).unwrap());
            }
            assert_eq!(&out, live.live_out(pos).unwrap());
        }
    }
}
