// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # bytefold
//!
//! A bytecode deobfuscation engine. `bytefold` rewrites JVM-style method bodies to undo common
//! obfuscation patterns (opaque predicates, junk gotos, redundant exception ranges, dead stores
//! and stack-shuffle junk) without changing observable behavior.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytefold::prelude::*;
//!
//! let body = MethodBuilder::new("Demo", "answer", "()I")
//!     .iconst(0)
//!     .jump(Condition::Eq, "taken")
//!     .iconst(1)
//!     .ireturn()
//!     .label("taken")
//!     .iconst(40)
//!     .iconst(2)
//!     .iadd()
//!     .ireturn()
//!     .build()?;
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default());
//! let (body, result) = engine.process_method(body)?;
//! println!("{}", result.summary());
//! for (_, insn) in &body.instructions {
//!     println!("{insn}");
//! }
//! # Ok::<(), bytefold::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - instructions, the arena instruction list, method bodies and the builder
//! - [`analysis`] - flow graph, abstract frames, bounded evaluation, liveness, type queries
//! - [`compiler`] - the pass trait, registry, scheduler and event log
//! - [`deobfuscation`] - the engine, contexts, workspace and the built-in passes
//! - [`prelude`] - re-exports of the commonly used types
//!
//! ## Passes
//!
//! | Name | Effect |
//! |------|--------|
//! | `dead-code-removal` | removes code unreachable from the entry or a live handler |
//! | `goto-inlining` | moves single-entry blocks to the goto that reaches them |
//! | `constant-folding` | normalizes stack shuffles, folds known computations |
//! | `opaque-predicate-folding` | resolves branches and switches with known operands |
//! | `variable-folding` | removes dead stores and redundant copy variables |
//! | `redundant-try-catch-removal` | drops exception ranges that can never fire |
//! | `duplicate-catch-merging` | merges identical handler blocks (off by default) |

#[macro_use]
pub(crate) mod error;

pub mod analysis;
pub mod assembly;
pub mod compiler;
pub mod deobfuscation;
pub mod utils;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use bytefold::prelude::*;
///
/// let workspace = Workspace::new();
/// let result = DeobfuscationEngine::default().process(&workspace)?;
/// assert!(result.is_clean());
/// # Ok::<(), bytefold::Error>(())
/// ```
pub mod prelude;

/// `bytefold` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `bytefold` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use bytefold::{assembly::MethodBuilder, Error};
///
/// match MethodBuilder::new("A", "m", "()V").goto("missing").build() {
///     Ok(_) => println!("built"),
///     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
///     Err(e) => println!("error: {e}"),
/// }
/// ```
pub use error::Error;
