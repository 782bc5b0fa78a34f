//! Pass traits and infrastructure for the deobfuscation pipeline.
//!
//! This module defines the [`MethodPass`] trait that all passes implement, and the
//! [`PassDescriptor`] the scheduler orders them by.

use crate::{
    assembly::MethodKey,
    deobfuscation::{AnalysisContext, MethodContext},
    Result,
};

/// Scheduling metadata of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDescriptor {
    /// Unique pass name.
    pub name: &'static str,
    /// Passes that must run before this one whenever it runs. They are added to the pipeline
    /// automatically.
    pub dependencies: &'static [&'static str],
    /// Passes that should run before this one if they are scheduled anyway.
    pub recommended_predecessors: &'static [&'static str],
    /// Passes that should run after this one if they are scheduled anyway.
    pub recommended_successors: &'static [&'static str],
    /// Drop the pass from later pipeline iterations once an iteration finds nothing to do.
    pub prune_after_no_work: bool,
}

/// A transformation applied to one method at a time.
///
/// All passes must be thread-safe (Send + Sync) to allow parallel execution.
/// Passes receive exclusive access to the method's session and shared access to the
/// run context through it.
///
/// # Pipeline Integration
///
/// Passes declare how they relate to each other instead of a fixed priority:
///
/// - **Dependencies** are hard: a dependency is pulled into the pipeline and always runs
///   earlier in each iteration. Cycles are rejected.
/// - **Recommended predecessors/successors** are soft: honoured when both passes are
///   scheduled and the hint does not contradict a hard dependency.
///
/// Every pass is expected to iterate internally to its own fixed point, so that running it
/// twice in a row reports no change the second time.
pub trait MethodPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Names of passes that must run before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Names of passes that should preferably run before this one.
    fn recommended_predecessors(&self) -> &'static [&'static str] {
        &[]
    }

    /// Names of passes that should preferably run after this one.
    fn recommended_successors(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether the scheduler may stop running this pass once an iteration finds no work.
    fn prune_after_no_work(&self) -> bool {
        false
    }

    /// The scheduling metadata gathered from the other trait methods.
    fn descriptor(&self) -> PassDescriptor {
        PassDescriptor {
            name: self.name(),
            dependencies: self.dependencies(),
            recommended_predecessors: self.recommended_predecessors(),
            recommended_successors: self.recommended_successors(),
            prune_after_no_work: self.prune_after_no_work(),
        }
    }

    /// Should this pass run on a specific method?
    ///
    /// Called before `run_on_method`. Override to skip methods that
    /// can't benefit from this pass (e.g., no exception ranges).
    fn should_run(&self, _method: &MethodKey, _ctx: &AnalysisContext) -> bool {
        true
    }

    /// Run the pass on a single method.
    ///
    /// Returns `true` if any changes were made, `false` otherwise.
    /// Events should be recorded through `ctx.record`.
    ///
    /// # Errors
    ///
    /// Returns an error if the method body is structurally damaged or its frames cannot be
    /// computed. The scheduler wraps it with the pass and method name.
    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool>;

    /// Called once before the pass runs in an iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &AnalysisContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the pass completes in an iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &AnalysisContext) -> Result<()> {
        Ok(())
    }
}
