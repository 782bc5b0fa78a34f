//! Program analysis infrastructure for method bodies.
//!
//! This module provides the analyses the deobfuscation passes are driven by. Every analysis
//! works on a snapshot of a [`crate::assembly::MethodBody`] and is invalidated by any edit to
//! it; passes recompute what they need after mutating.
//!
//! # Architecture
//!
//! The analysis module is organized into focused sub-modules:
//!
//! - [`cfg`] - Instruction-level flow graph with exceptional edges, and reachability
//! - [`frame`] - Abstract values, frames and the [`FrameProvider`] contract
//! - [`interpreter`] - [`ValueInterpreter`], the reference frame provider
//! - [`evaluator`] - Bounded single-path evaluation of sequences and static callees
//! - [`lookup`] - Built-in values for library constants and pure library calls
//! - [`liveness`] - Backward live-slot analysis
//! - [`hierarchy`] - [`TypeOracle`] and the reference [`ClassHierarchy`]
//!
//! # Usage
//!
//! ```rust
//! use bytefold::analysis::{FrameProvider, Frames, ValueInterpreter};
//! use bytefold::assembly::MethodBuilder;
//!
//! let body = MethodBuilder::new("Demo", "five", "()I")
//!     .iconst(2)
//!     .iconst(3)
//!     .iadd()
//!     .ireturn()
//!     .build()?;
//!
//! let frames = Frames::compute(&ValueInterpreter::new(), &body)?;
//! let ret = body.instructions.last().unwrap();
//! assert_eq!(frames.at(ret).and_then(|f| f.top(0)).and_then(|v| v.as_int()), Some(5));
//! # Ok::<(), bytefold::Error>(())
//! ```

pub mod cfg;
pub mod evaluator;
pub mod frame;
pub mod hierarchy;
pub mod interpreter;
pub mod liveness;
pub mod lookup;

pub use cfg::{EdgeKind, FlowGraph};
pub use evaluator::{EvalFailure, Evaluator};
pub use frame::{AbstractValue, Frame, FrameProvider, Frames, Nullness, RefValue};
pub use hierarchy::{ClassHierarchy, TypeOracle, OBJECT};
pub use interpreter::ValueInterpreter;
pub use liveness::Liveness;
pub use lookup::MethodLookup;
