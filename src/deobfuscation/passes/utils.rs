//! Shared utilities for deobfuscation passes.
//!
//! This module contains the instruction-list walks used by multiple passes, so that every pass
//! agrees on what counts as "the next real instruction" or "the producer of this operand".

use crate::assembly::{Insn, InsnId, InsnList, StackOp};

/// First executable instruction after `id`, skipping labels and line numbers.
#[must_use]
pub fn next_real(list: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = list.next(id);
    while let Some(current) = cursor {
        if !list.get(current).is_some_and(Insn::is_meta) {
            return Some(current);
        }
        cursor = list.next(current);
    }
    None
}

/// Last executable instruction before `id`, skipping labels and line numbers.
#[must_use]
pub fn prev_real(list: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = list.prev(id);
    while let Some(current) = cursor {
        if !list.get(current).is_some_and(Insn::is_meta) {
            return Some(current);
        }
        cursor = list.prev(current);
    }
    None
}

/// Previous instruction, skipping only line numbers and `nop`s.
///
/// Labels are returned, since a label may be a merge point that separates a producer from its
/// consumer.
#[must_use]
pub fn prev_significant(list: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = list.prev(id);
    while let Some(current) = cursor {
        match list.get(current) {
            Some(Insn::Line(_) | Insn::Nop) => cursor = list.prev(current),
            _ => return Some(current),
        }
    }
    None
}

/// The single instruction that pushed the top operand consumed by `consumer`, if it directly
/// precedes it and is a removable producer: a constant, a local load, or a `dup`/`dup2` whose
/// own value stays on the stack. Callers check that the producer pushes as many slots as the
/// consumer takes.
///
/// The producer must not be a label target, so that no other path contributes the value.
#[must_use]
pub fn removable_producer(list: &InsnList, consumer: InsnId) -> Option<InsnId> {
    let prev = prev_significant(list, consumer)?;
    match list.get(prev)? {
        Insn::Const(_) | Insn::Load(..) | Insn::Stack(StackOp::Dup | StackOp::Dup2) => Some(prev),
        _ => None,
    }
}
