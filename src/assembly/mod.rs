//! The mutable program model.
//!
//! A [`MethodBody`] owns an [`InsnList`], a doubly linked sequence of [`Insn`] nodes stored in an
//! arena and addressed by stable [`InsnId`] handles, together with its exception ranges
//! ([`TryCatchBlock`]) and local variable debug ranges ([`LocalVariable`]). Labels are ordinary
//! nodes; jumps and ranges refer to them by handle.
//!
//! # Architecture
//!
//! ```text
//! MethodBuilder ──build()──► MethodBody
//!                              ├─ InsnList      arena + prev/next links, O(1) edits
//!                              ├─ TryCatchBlock start/end/handler labels
//!                              └─ LocalVariable start/end labels
//! ```
//!
//! Passes edit bodies in place. Structural invariants (every referenced label is a linked label
//! node, ranges are ordered) are checked by [`MethodBody::verify`].

mod body;
mod builder;
pub mod descriptor;
mod instruction;
mod list;
pub mod opcodes;

pub use body::{LocalVariable, MethodAccess, MethodBody, MethodKey, TryCatchBlock};
pub use builder::MethodBuilder;
pub use instruction::{
    ArrayKind, BinaryOp, CompareOp, Condition, Constant, FieldOp, Insn, InvokeKind, MemberRef,
    NarrowKind, NumKind, PrimitiveType, StackEffect, StackOp, VarKind,
};
pub use list::{InsnId, InsnList, Iter, Positions};
