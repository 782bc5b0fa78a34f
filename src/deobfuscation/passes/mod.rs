//! Built-in deobfuscation passes.
//!
//! Every pass rewrites one method body at a time through a
//! [`MethodContext`](crate::deobfuscation::MethodContext) and reports what it changed as events.
//!
//! | Pass | Name | Needs |
//! |------|------|-------|
//! | [`DeadCodePass`] | `dead-code-removal` | reachability |
//! | [`GotoInliningPass`] | `goto-inlining` | reachability |
//! | [`ConstantFoldingPass`] | `constant-folding` | frames |
//! | [`OpaquePredicatePass`] | `opaque-predicate-folding` | frames |
//! | [`VariableFoldingPass`] | `variable-folding` | frames, liveness |
//! | [`RedundantTryCatchPass`] | `redundant-try-catch-removal` | frames, type oracle |
//! | [`DuplicateCatchPass`] | `duplicate-catch-merging` | none |
//!
//! # Ordering
//!
//! Hard dependencies are declared by each pass and always honored by the
//! [`PassScheduler`](crate::compiler::PassScheduler). Soft hints order the rest:
//!
//! ```text
//! dead-code-removal
//!   ├─ goto-inlining
//!   ├─ variable-folding ──▶ constant-folding ──▶ opaque-predicate-folding
//!   └─ redundant-try-catch-removal ──▶ duplicate-catch-merging
//! ```
//!
//! [`default_registry`] knows every pass by name, which is how the scheduler pulls in a
//! dependency the caller did not ask for.

mod catches;
mod deadcode;
mod folding;
mod gotos;
mod predicates;
mod trycatch;
pub(crate) mod utils;
mod variables;

pub use self::catches::{merge_duplicate_handlers, DuplicateCatchPass, MIN_BLOCK_SIZE};
pub use self::deadcode::{prune_unreachable, DeadCodePass};
pub use self::folding::{fold_sequences, normalize_stack, ConstantFoldingPass, ScanOutcome};
pub use self::gotos::{inline_gotos, GotoInliningPass, InlineOutcome};
pub use self::predicates::{collapse_uniform_switches, fold_predicates, OpaquePredicatePass};
pub use self::trycatch::{remove_shadowed_handlers, Handling, RedundantTryCatchPass};
pub use self::variables::{
    inline_constant_locals, propagate_copies, remove_dead_stores, VariableFoldingPass,
};

use crate::compiler::PassRegistry;

/// A registry with every built-in pass.
#[must_use]
pub fn default_registry() -> PassRegistry {
    let mut registry = PassRegistry::new();
    registry.register(DeadCodePass::NAME, || Box::new(DeadCodePass::new()));
    registry.register(GotoInliningPass::NAME, || Box::new(GotoInliningPass::new()));
    registry.register(ConstantFoldingPass::NAME, || Box::new(ConstantFoldingPass::new()));
    registry.register(OpaquePredicatePass::NAME, || Box::new(OpaquePredicatePass::new()));
    registry.register(VariableFoldingPass::NAME, || Box::new(VariableFoldingPass::new()));
    registry.register(RedundantTryCatchPass::NAME, || {
        Box::new(RedundantTryCatchPass::new())
    });
    registry.register(DuplicateCatchPass::NAME, || Box::new(DuplicateCatchPass::new()));
    registry
}
