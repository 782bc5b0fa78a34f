//! Arena-backed doubly linked instruction list.
//!
//! Every instruction lives in an arena slot addressed by an [`InsnId`]. Handles are stable: they
//! survive insertions and removals elsewhere in the list, so analysis results keyed by handle
//! (frames, reachability) stay meaningful for untouched instructions while a pass rewrites the
//! list around them. Removed slots are unlinked but never reused within one list.

use std::fmt;

use crate::{assembly::Insn, Result};

/// Stable handle of an instruction within one [`InsnList`].
///
/// Labels are instructions too, so jump targets and range endpoints are `InsnId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(u32);

impl InsnId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    linked: bool,
}

/// A mutable, ordered instruction sequence with O(1) insertion, replacement and removal.
#[derive(Debug, Clone, Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    head: Option<InsnId>,
    tail: Option<InsnId>,
    len: usize,
}

impl InsnList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no instruction is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of arena slots ever allocated, linked or not. Upper bound for [`InsnId::index`].
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// First instruction.
    #[must_use]
    pub fn first(&self) -> Option<InsnId> {
        self.head
    }

    /// Last instruction.
    #[must_use]
    pub fn last(&self) -> Option<InsnId> {
        self.tail
    }

    /// Instruction following `id`.
    #[must_use]
    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).and_then(|n| n.next)
    }

    /// Instruction preceding `id`.
    #[must_use]
    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).and_then(|n| n.prev)
    }

    /// Returns `true` if `id` is currently linked into this list.
    #[must_use]
    pub fn contains(&self, id: InsnId) -> bool {
        self.node(id).is_some()
    }

    /// The instruction at `id`, if linked.
    #[must_use]
    pub fn get(&self, id: InsnId) -> Option<&Insn> {
        self.node(id).map(|n| &n.insn)
    }

    /// Mutable access to the instruction at `id`, if linked.
    pub fn get_mut(&mut self, id: InsnId) -> Option<&mut Insn> {
        self.nodes
            .get_mut(id.index())
            .filter(|n| n.linked)
            .map(|n| &mut n.insn)
    }

    /// Appends an instruction.
    pub fn push(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        self.link_after(self.tail, id);
        id
    }

    /// Inserts `insn` immediately before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `anchor` is not linked.
    pub fn insert_before(&mut self, anchor: InsnId, insn: Insn) -> Result<InsnId> {
        self.ensure_linked(anchor)?;
        let prev = self.prev(anchor);
        let id = self.alloc(insn);
        self.link_after(prev, id);
        Ok(id)
    }

    /// Inserts `insn` immediately after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `anchor` is not linked.
    pub fn insert_after(&mut self, anchor: InsnId, insn: Insn) -> Result<InsnId> {
        self.ensure_linked(anchor)?;
        let id = self.alloc(insn);
        self.link_after(Some(anchor), id);
        Ok(id)
    }

    /// Replaces the instruction at `id` in place, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `id` is not linked.
    pub fn set(&mut self, id: InsnId, insn: Insn) -> Result<Insn> {
        self.ensure_linked(id)?;
        Ok(std::mem::replace(&mut self.nodes[id.index()].insn, insn))
    }

    /// Unlinks the instruction at `id` and returns a copy of it.
    ///
    /// This does not check whether a removed label is still referenced; use
    /// [`crate::assembly::MethodBody::remove`] for that.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `id` is not linked.
    pub fn remove(&mut self, id: InsnId) -> Result<Insn> {
        self.ensure_linked(id)?;
        self.unlink(id, id);
        self.nodes[id.index()].linked = false;
        self.len -= 1;
        Ok(self.nodes[id.index()].insn.clone())
    }

    /// Moves the inclusive run `first..=last` so that it directly follows `after`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if any handle is unlinked, if `last` does not follow
    /// `first`, or if `after` lies inside the run.
    pub fn move_range_after(&mut self, first: InsnId, last: InsnId, after: InsnId) -> Result<()> {
        self.ensure_linked(first)?;
        self.ensure_linked(last)?;
        self.ensure_linked(after)?;

        let mut cursor = Some(first);
        let mut found_last = false;
        while let Some(id) = cursor {
            if id == after {
                return Err(malformed_error!("cannot move range {}..{} after itself", first, last));
            }
            if id == last {
                found_last = true;
                break;
            }
            cursor = self.next(id);
        }
        if !found_last {
            return Err(malformed_error!("range end {} does not follow start {}", last, first));
        }

        self.unlink(first, last);
        let follow = self.next(after);
        self.nodes[first.index()].prev = Some(after);
        self.nodes[last.index()].next = follow;
        self.nodes[after.index()].next = Some(first);
        match follow {
            Some(f) => self.nodes[f.index()].prev = Some(last),
            None => self.tail = Some(last),
        }
        Ok(())
    }

    /// Iterates linked instructions in order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Handles of all linked instructions, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Snapshot of the current order, mapping handles to positions and back.
    #[must_use]
    pub fn positions(&self) -> Positions {
        let order = self.ids();
        let mut index = vec![usize::MAX; self.nodes.len()];
        for (pos, id) in order.iter().enumerate() {
            index[id.index()] = pos;
        }
        Positions { order, index }
    }

    fn node(&self, id: InsnId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|n| n.linked)
    }

    fn ensure_linked(&self, id: InsnId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(malformed_error!("instruction {} is not part of the list", id))
        }
    }

    fn alloc(&mut self, insn: Insn) -> InsnId {
        let id = InsnId(self.nodes.len() as u32);
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
            linked: true,
        });
        self.len += 1;
        id
    }

    /// Links the detached node `id` after `prev`, or at the head when `prev` is `None`.
    fn link_after(&mut self, prev: Option<InsnId>, id: InsnId) {
        let next = match prev {
            Some(p) => self.nodes[p.index()].next,
            None => self.head,
        };
        self.nodes[id.index()].prev = prev;
        self.nodes[id.index()].next = next;
        match prev {
            Some(p) => self.nodes[p.index()].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.nodes[n.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    /// Detaches the run `first..=last` from its neighbours, leaving the run's inner links intact.
    fn unlink(&mut self, first: InsnId, last: InsnId) {
        let prev = self.nodes[first.index()].prev;
        let next = self.nodes[last.index()].next;
        match prev {
            Some(p) => self.nodes[p.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n.index()].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[first.index()].prev = None;
        self.nodes[last.index()].next = None;
    }
}

/// Iterator over `(handle, instruction)` pairs of an [`InsnList`].
pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = &self.list.nodes[id.index()];
        self.cursor = node.next;
        Some((id, &node.insn))
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = (InsnId, &'a Insn);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<T: IntoIterator<Item = Insn>>(iter: T) -> Self {
        let mut list = Self::new();
        for insn in iter {
            list.push(insn);
        }
        list
    }
}

/// A frozen mapping between handles and positions of an [`InsnList`].
///
/// Positions are only valid for the list state the snapshot was taken from.
#[derive(Debug, Clone, Default)]
pub struct Positions {
    order: Vec<InsnId>,
    index: Vec<usize>,
}

impl Positions {
    /// Position of `id`, if it was linked when the snapshot was taken.
    #[must_use]
    pub fn of(&self, id: InsnId) -> Option<usize> {
        self.index
            .get(id.index())
            .copied()
            .filter(|&p| p != usize::MAX)
    }

    /// Handle at `pos`.
    #[must_use]
    pub fn at(&self, pos: usize) -> Option<InsnId> {
        self.order.get(pos).copied()
    }

    /// Handles in order.
    #[must_use]
    pub fn order(&self) -> &[InsnId] {
        &self.order
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
