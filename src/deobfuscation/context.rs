//! Shared and per-method state for a deobfuscation run.
//!
//! The [`AnalysisContext`] holds everything that is shared by all passes and all methods
//! during one run: the configuration, the event log, the frame provider, the type oracle and
//! the bookkeeping of which methods changed or failed. It is `Sync` and only ever accessed
//! through shared references.
//!
//! A [`MethodContext`] is the session of one pass on one method. It owns the body while the
//! pass runs, caches the body's frames and drops them whenever the pass declares them stale.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashSet;

use crate::{
    analysis::{FrameProvider, Frames, MethodLookup, TypeOracle, ValueInterpreter},
    assembly::{MethodBody, MethodKey},
    compiler::{EventBuilder, EventKind, EventLog},
    deobfuscation::{config::EngineConfig, passes::prune_unreachable, ExceptionUsage},
    Result,
};

/// Run-wide state shared by every pass.
///
/// All collection fields use thread-safe types (`DashSet`, `SkipMap`, `boxcar`) so methods can
/// be processed in parallel.
pub struct AnalysisContext {
    /// Engine configuration (for pass-specific limits).
    pub config: EngineConfig,

    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Methods whose body was changed by at least one pass.
    pub processed_methods: DashSet<MethodKey>,

    /// Methods restored after a pass failure, with the failure message.
    pub failures: SkipMap<MethodKey, String>,

    /// Subtype queries for exception analysis.
    oracle: Arc<dyn TypeOracle>,

    /// Source of abstract frames.
    frame_provider: Arc<dyn FrameProvider>,

    /// Interpreter used for bounded evaluation inside passes.
    interpreter: ValueInterpreter,

    /// Workspace exception types and their instantiations, when a whole workspace is processed.
    exceptions: Option<Arc<ExceptionUsage>>,

    /// When the run started.
    start_time: Instant,
}

impl AnalysisContext {
    /// Creates a context whose frames come from a [`ValueInterpreter`] configured from `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration.
    /// * `oracle` - Type hierarchy oracle.
    /// * `callees` - Bodies of static methods that may be evaluated at call sites.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        oracle: Arc<dyn TypeOracle>,
        callees: Option<Arc<dyn MethodLookup>>,
    ) -> Self {
        let mut interpreter = ValueInterpreter::new()
            .with_call_budget(config.call_eval_step_budget)
            .with_max_call_depth(config.call_eval_max_depth)
            .with_max_visits(config.max_frame_visits);
        if let Some(callees) = callees {
            interpreter = interpreter.with_callees(callees);
        }
        Self {
            frame_provider: Arc::new(interpreter.clone()),
            interpreter,
            exceptions: None,
            oracle,
            config,
            events: EventLog::new(),
            processed_methods: DashSet::new(),
            failures: SkipMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Replaces the frame provider.
    #[must_use]
    pub fn with_frame_provider(mut self, provider: Arc<dyn FrameProvider>) -> Self {
        self.frame_provider = provider;
        self
    }

    /// Attaches the exception usage of the workspace being processed.
    #[must_use]
    pub fn with_exception_usage(mut self, usage: ExceptionUsage) -> Self {
        self.exceptions = Some(Arc::new(usage));
        self
    }

    /// Exception usage of the workspace, absent when methods are processed one by one.
    #[must_use]
    pub fn exception_usage(&self) -> Option<&ExceptionUsage> {
        self.exceptions.as_deref()
    }

    /// The type oracle.
    #[must_use]
    pub fn oracle(&self) -> &dyn TypeOracle {
        self.oracle.as_ref()
    }

    /// The frame provider.
    #[must_use]
    pub fn frame_provider(&self) -> &dyn FrameProvider {
        self.frame_provider.as_ref()
    }

    /// The interpreter used for bounded evaluation.
    #[must_use]
    pub fn interpreter(&self) -> &ValueInterpreter {
        &self.interpreter
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Records that `method` failed and was restored.
    pub fn record_failure(&self, method: &MethodKey, pass: &str, message: impl Into<String>) {
        let message = message.into();
        self.events
            .record(EventKind::PassFailed)
            .method(method.clone())
            .pass(pass)
            .message(message.clone());
        self.failures.insert(method.clone(), message);
    }

    /// Returns `true` if `method` failed in this run.
    #[must_use]
    pub fn has_failed(&self, method: &MethodKey) -> bool {
        self.failures.contains_key(method)
    }
}

/// One pass's session on one method.
pub struct MethodContext<'a> {
    key: MethodKey,
    body: MethodBody,
    pass: &'static str,
    frames: Option<Arc<Frames>>,
    analysis: &'a AnalysisContext,
}

impl<'a> MethodContext<'a> {
    /// Starts a session for `pass` on `body`.
    #[must_use]
    pub fn new(body: MethodBody, pass: &'static str, analysis: &'a AnalysisContext) -> Self {
        Self {
            key: body.key(),
            body,
            pass,
            frames: None,
            analysis,
        }
    }

    /// The method being transformed.
    #[must_use]
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Name of the pass that owns this session.
    #[must_use]
    pub fn pass(&self) -> &'static str {
        self.pass
    }

    /// The current body.
    #[must_use]
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Mutable access to the body.
    ///
    /// Cached frames are dropped, since any edit may invalidate them.
    pub fn body_mut(&mut self) -> &mut MethodBody {
        self.frames = None;
        &mut self.body
    }

    /// Replaces the body wholesale and returns the previous one.
    pub fn replace_body(&mut self, body: MethodBody) -> MethodBody {
        self.frames = None;
        std::mem::replace(&mut self.body, body)
    }

    /// Ends the session, returning the body.
    #[must_use]
    pub fn into_body(self) -> MethodBody {
        self.body
    }

    /// Frames of the current body, computed on first use after every invalidation.
    ///
    /// # Errors
    ///
    /// Returns the frame provider's error, or [`crate::Error::FrameMismatch`] if it returned the
    /// wrong number of frames.
    pub fn frames(&mut self) -> Result<Arc<Frames>> {
        if let Some(frames) = &self.frames {
            return Ok(Arc::clone(frames));
        }
        let frames = Arc::new(Frames::compute(
            self.analysis.frame_provider(),
            &self.body,
        )?);
        self.frames = Some(Arc::clone(&frames));
        Ok(frames)
    }

    /// Declares the cached frames stale.
    pub fn mark_frames_dirty(&mut self) {
        self.frames = None;
    }

    /// Removes unreachable code from the body. Returns `true` if anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is structurally damaged.
    pub fn prune_unreachable(&mut self) -> Result<bool> {
        let before = self.body.instructions.len();
        let changed = prune_unreachable(&mut self.body)?;
        if changed {
            self.frames = None;
            let removed = before.saturating_sub(self.body.instructions.len());
            self.record(EventKind::DeadCodeRemoved)
                .message(format!("removed {removed} unreachable instructions"));
        }
        Ok(changed)
    }

    /// Starts an event attributed to this method and pass.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'a> {
        self.analysis
            .events
            .record(kind)
            .method(self.key.clone())
            .pass(self.pass)
    }

    /// The shared run context.
    #[must_use]
    pub fn analysis(&self) -> &'a AnalysisContext {
        self.analysis
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &'a EngineConfig {
        &self.analysis.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::ClassHierarchy, assembly::MethodBuilder};

    fn context() -> AnalysisContext {
        AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None)
    }

    #[test]
    fn test_frames_are_cached_until_dirty() {
        let analysis = context();
        let body = MethodBuilder::new("A", "m", "()I")
            .iconst(1)
            .ireturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        let first = ctx.frames().unwrap();
        let second = ctx.frames().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        ctx.mark_frames_dirty();
        let third = ctx.frames().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        ctx.body_mut();
        assert!(!Arc::ptr_eq(&third, &ctx.frames().unwrap()));
    }

    #[test]
    fn test_prune_records_event() {
        let analysis = context();
        let body = MethodBuilder::new("A", "m", "()V")
            .vreturn()
            .iconst(1)
            .pop()
            .vreturn()
            .build()
            .unwrap();
        let mut ctx = MethodContext::new(body, "test", &analysis);
        assert!(ctx.prune_unreachable().unwrap());
        assert!(!ctx.prune_unreachable().unwrap());
        assert_eq!(ctx.body().instructions.len(), 1);
        assert_eq!(analysis.events.count_kind(EventKind::DeadCodeRemoved), 1);
        let event = analysis.events.iter().next().unwrap();
        assert_eq!(event.pass.as_deref(), Some("test"));
    }

    #[test]
    fn test_record_failure() {
        let analysis = context();
        let key = MethodKey::new("A", "m", "()V");
        analysis.record_failure(&key, "goto-inlining", "boom");
        assert!(analysis.has_failed(&key));
        assert!(analysis.events.has(EventKind::PassFailed));
    }
}
