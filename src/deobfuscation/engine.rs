//! Main deobfuscation engine.
//!
//! The [`DeobfuscationEngine`] is the entry point for deobfuscating a set of method bodies. It
//! picks the enabled passes, builds the shared [`AnalysisContext`] and hands both to the
//! [`PassScheduler`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    analysis::MethodLookup,
    assembly::MethodBody,
    compiler::{PassRegistry, PassScheduler},
    deobfuscation::{
        config::EngineConfig,
        context::AnalysisContext,
        passes::{
            default_registry, ConstantFoldingPass, DeadCodePass, DuplicateCatchPass,
            GotoInliningPass, OpaquePredicatePass, RedundantTryCatchPass, VariableFoldingPass,
        },
        result::DeobfuscationResult,
        workspace::Workspace,
    },
    Result,
};

/// Main deobfuscation engine.
///
/// The engine runs every enabled pass, in dependency order, over every method of a
/// [`Workspace`] until an iteration changes nothing or
/// [`EngineConfig::max_iterations`] is reached. Methods whose pass fails are restored to their
/// body from before that pass (or the run aborts, with
/// [`EngineConfig::abort_on_error`]).
///
/// # Example
///
/// ```rust,ignore
/// use bytefold::prelude::*;
///
/// let workspace = Workspace::from_bodies(bodies);
/// let engine = DeobfuscationEngine::new(EngineConfig::default());
/// let result = engine.process(&workspace)?;
/// println!("{}", result.summary());
/// ```
pub struct DeobfuscationEngine {
    /// Configuration.
    config: EngineConfig,
    /// Pass factories by name.
    registry: PassRegistry,
}

impl Default for DeobfuscationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DeobfuscationEngine {
    /// Creates an engine with the built-in passes.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, default_registry())
    }

    /// Creates an engine resolving pass names through `registry`.
    #[must_use]
    pub fn with_registry(config: EngineConfig, registry: PassRegistry) -> Self {
        Self { config, registry }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Names of the passes enabled by the configuration, in request order.
    #[must_use]
    pub fn enabled_passes(&self) -> Vec<&'static str> {
        let config = &self.config;
        [
            (config.enable_dead_code_removal, DeadCodePass::NAME),
            (config.enable_goto_inlining, GotoInliningPass::NAME),
            (config.enable_variable_folding, VariableFoldingPass::NAME),
            (config.enable_constant_folding, ConstantFoldingPass::NAME),
            (config.enable_opaque_predicate_folding, OpaquePredicatePass::NAME),
            (config.enable_try_catch_removal, RedundantTryCatchPass::NAME),
            (config.enable_catch_merging, DuplicateCatchPass::NAME),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect()
    }

    /// Builds the scheduler for the enabled passes and their dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownPass`] or [`crate::Error::DependencyCycle`] if the
    /// registry cannot satisfy the enabled passes.
    pub fn scheduler(&self) -> Result<PassScheduler> {
        PassScheduler::from_names(&self.enabled_passes(), &self.registry, self.config.max_iterations)
    }

    /// Runs the pipeline over every method of `workspace`, rewriting bodies in place.
    ///
    /// Static methods of the workspace, as they were before the run, are available to the
    /// interpreter for call evaluation.
    ///
    /// # Errors
    ///
    /// Returns scheduler construction errors, and the first pass failure when
    /// [`EngineConfig::abort_on_error`] is set.
    pub fn process(&self, workspace: &Workspace) -> Result<DeobfuscationResult> {
        let mut scheduler = self.scheduler()?;
        let callees: Arc<dyn MethodLookup> = Arc::new(workspace.static_snapshot());
        let ctx = AnalysisContext::new(
            self.config.clone(),
            workspace.hierarchy().clone(),
            Some(callees),
        )
        .with_exception_usage(workspace.exception_usage());
        let passes = scheduler.pass_names();
        info!(methods = workspace.len(), passes = ?passes, "starting deobfuscation");

        let iterations = scheduler.run_pipeline(&ctx, workspace)?;

        let mut changed_methods: Vec<_> = ctx
            .processed_methods
            .iter()
            .map(|key| key.key().clone())
            .collect();
        changed_methods.sort();
        let failures = ctx
            .failures
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut result = DeobfuscationResult::new(ctx.events.take())
            .with_timing(ctx.elapsed(), iterations);
        result.changed_methods = changed_methods;
        result.failures = failures;
        result.passes = passes;
        debug!(iterations, summary = %result.summary(), "deobfuscation finished");
        Ok(result)
    }

    /// Runs the pipeline over a single method body.
    ///
    /// # Errors
    ///
    /// Same as [`process`](Self::process).
    pub fn process_method(&self, body: MethodBody) -> Result<(MethodBody, DeobfuscationResult)> {
        let key = body.key();
        let workspace = Workspace::from_bodies([body]);
        let result = self.process(&workspace)?;
        let body = workspace
            .take(&key)
            .ok_or_else(|| crate::Error::Error(format!("method {key} vanished during processing")))?;
        Ok((body, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::MethodBuilder, compiler::EventKind};

    #[test]
    fn test_engine_default() {
        let engine = DeobfuscationEngine::default();
        assert_eq!(engine.config().max_iterations, EngineConfig::default().max_iterations);
        assert_eq!(engine.enabled_passes().len(), 6);
    }

    #[test]
    fn test_pipeline_passes_selective() {
        let config = EngineConfig::default()
            .with_flow_passes(false, true, false)
            .with_value_passes(false, false)
            .with_exception_passes(false, false);
        let engine = DeobfuscationEngine::new(config);
        assert_eq!(engine.enabled_passes(), [GotoInliningPass::NAME]);
        // the hard dependency is pulled back in
        let scheduler = engine.scheduler().unwrap();
        assert_eq!(scheduler.pass_names(), [DeadCodePass::NAME, GotoInliningPass::NAME]);
    }

    #[test]
    fn test_process_method() {
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(2)
            .iconst(3)
            .iadd()
            .ireturn()
            .build()
            .unwrap();
        let engine = DeobfuscationEngine::default();
        let (body, result) = engine.process_method(body).unwrap();
        let code: Vec<String> = body
            .instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| insn.to_string())
            .collect();
        assert_eq!(code, ["iconst_5", "ireturn"]);
        assert!(result.is_clean());
        assert!(result.events.has(EventKind::ConstantFolded));
        assert_eq!(result.changed_methods.len(), 1);
        assert!(result.iterations >= 1);
    }

    #[test]
    fn test_unchanged_method_reports_nothing() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .iload(0)
            .ireturn()
            .build()
            .unwrap();
        let (_, result) = DeobfuscationEngine::default().process_method(body).unwrap();
        assert!(result.changed_methods.is_empty());
        assert_eq!(result.events.transformation_count(), 0);
        assert_eq!(result.iterations, 1);
    }
}
