//! Configuration for the deobfuscation engine.
//!
//! This module provides configuration types for controlling the deobfuscation
//! pipeline, including pass selection, iteration limits, and evaluation budgets.

/// Configuration for the deobfuscation engine.
///
/// Controls all aspects of the deobfuscation pipeline including iteration limits,
/// pass selection, evaluation budgets and the failure policy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum iterations of the whole pass pipeline (default: 10).
    pub max_iterations: usize,

    /// Maximum internal rounds a single pass runs on one method before it stops
    /// looking for further work (default: 32).
    pub max_pass_rounds: usize,

    /// Step budget for evaluating one static callee (default: 1000).
    pub call_eval_step_budget: usize,

    /// Maximum nesting of callee evaluation (default: 4).
    pub call_eval_max_depth: usize,

    /// Maximum times the frame interpreter revisits one instruction before giving up
    /// on a method (default: 64).
    pub max_frame_visits: usize,

    /// Enable dead code removal.
    pub enable_dead_code_removal: bool,

    /// Enable goto inlining.
    pub enable_goto_inlining: bool,

    /// Enable constant and stack-operation folding.
    pub enable_constant_folding: bool,

    /// Enable opaque predicate folding.
    pub enable_opaque_predicate_folding: bool,

    /// Enable dead store and redundant copy folding.
    pub enable_variable_folding: bool,

    /// Enable redundant try-catch removal.
    pub enable_try_catch_removal: bool,

    /// Enable merging of duplicated catch handlers.
    pub enable_catch_merging: bool,

    /// Replace loads of locals whose value is a known constant with the constant.
    pub inline_constant_locals: bool,

    /// Verify the structural invariants of every method after each pass (slow).
    pub verify_structure: bool,

    /// Process methods in parallel.
    pub parallel: bool,

    /// Abort the whole batch on the first pass failure instead of restoring the
    /// method and continuing.
    pub abort_on_error: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_pass_rounds: 32,
            call_eval_step_budget: 1_000,
            call_eval_max_depth: 4,
            max_frame_visits: 64,
            enable_dead_code_removal: true,
            enable_goto_inlining: true,
            enable_constant_folding: true,
            enable_opaque_predicate_folding: true,
            enable_variable_folding: true,
            enable_try_catch_removal: true,
            enable_catch_merging: false,
            inline_constant_locals: false,
            verify_structure: false,
            parallel: true,
            abort_on_error: false,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default settings.
    ///
    /// # Returns
    ///
    /// A new `EngineConfig` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "fast" configuration for quick processing.
    ///
    /// This configuration uses:
    /// - Fewer pipeline iterations (3 max) and pass rounds (8 max)
    /// - A small callee evaluation budget (100 steps, depth 1)
    /// - No try-catch or catch-merging passes
    ///
    /// # Returns
    ///
    /// A new `EngineConfig` optimized for speed over thoroughness.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_iterations: 3,
            max_pass_rounds: 8,
            call_eval_step_budget: 100,
            call_eval_max_depth: 1,
            max_frame_visits: 16,
            enable_try_catch_removal: false,
            enable_catch_merging: false,
            ..Self::default()
        }
    }

    /// Creates an "aggressive" configuration for maximum deobfuscation.
    ///
    /// This configuration uses:
    /// - More iterations (25 pipeline, 128 per pass)
    /// - Extended callee evaluation (10k steps, depth 8)
    /// - All passes enabled including catch merging and constant local inlining
    ///
    /// # Returns
    ///
    /// A new `EngineConfig` optimized for thoroughness over speed.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_iterations: 25,
            max_pass_rounds: 128,
            call_eval_step_budget: 10_000,
            call_eval_max_depth: 8,
            max_frame_visits: 256,
            enable_catch_merging: true,
            inline_constant_locals: true,
            ..Self::default()
        }
    }

    /// Sets the maximum number of pipeline iterations.
    ///
    /// # Arguments
    ///
    /// * `max` - The maximum number of pipeline iterations.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Sets the maximum number of internal rounds per pass and method.
    #[must_use]
    pub fn with_max_pass_rounds(mut self, max: usize) -> Self {
        self.max_pass_rounds = max;
        self
    }

    /// Sets the callee evaluation limits.
    ///
    /// # Arguments
    ///
    /// * `step_budget` - Maximum instructions executed per callee evaluation.
    /// * `max_depth` - Maximum nesting of callee evaluations.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_call_eval_limits(mut self, step_budget: usize, max_depth: usize) -> Self {
        self.call_eval_step_budget = step_budget;
        self.call_eval_max_depth = max_depth;
        self
    }

    /// Enables or disables the replacement of known-constant local loads.
    #[must_use]
    pub fn with_inline_constant_locals(mut self, enable: bool) -> Self {
        self.inline_constant_locals = enable;
        self
    }

    /// Enables or disables structural verification after every pass.
    #[must_use]
    pub fn with_verify_structure(mut self, enable: bool) -> Self {
        self.verify_structure = enable;
        self
    }

    /// Enables or disables parallel processing of methods.
    #[must_use]
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.parallel = enable;
        self
    }

    /// Sets the failure policy.
    ///
    /// # Arguments
    ///
    /// * `abort` - `true` to abort on the first failure, `false` to restore the method
    ///   and continue.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    /// Enables or disables the control flow passes.
    ///
    /// # Arguments
    ///
    /// * `dead_code` - Enable dead code removal.
    /// * `gotos` - Enable goto inlining.
    /// * `opaque_predicates` - Enable opaque predicate folding.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_flow_passes(mut self, dead_code: bool, gotos: bool, opaque_predicates: bool) -> Self {
        self.enable_dead_code_removal = dead_code;
        self.enable_goto_inlining = gotos;
        self.enable_opaque_predicate_folding = opaque_predicates;
        self
    }

    /// Enables or disables the value passes.
    ///
    /// # Arguments
    ///
    /// * `constants` - Enable constant and stack-operation folding.
    /// * `variables` - Enable variable folding.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_value_passes(mut self, constants: bool, variables: bool) -> Self {
        self.enable_constant_folding = constants;
        self.enable_variable_folding = variables;
        self
    }

    /// Enables or disables the exception range passes.
    #[must_use]
    pub fn with_exception_passes(mut self, try_catch: bool, catch_merging: bool) -> Self {
        self.enable_try_catch_removal = try_catch;
        self.enable_catch_merging = catch_merging;
        self
    }

    /// Checks if all passes are enabled.
    ///
    /// # Returns
    ///
    /// `true` if every pass of the pipeline is enabled.
    #[must_use]
    pub fn all_passes_enabled(&self) -> bool {
        self.enable_dead_code_removal
            && self.enable_goto_inlining
            && self.enable_constant_folding
            && self.enable_opaque_predicate_folding
            && self.enable_variable_folding
            && self.enable_try_catch_removal
            && self.enable_catch_merging
    }
}
