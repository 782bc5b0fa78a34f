//! Deobfuscation result types.

use std::time::Duration;

use crate::{
    assembly::MethodKey,
    compiler::{DerivedStats, EventLog},
};

/// Outcome of one engine run over a workspace.
///
/// Statistics are derived from the event log on demand.
///
/// # Example
///
/// ```rust,ignore
/// let result = engine.process(&workspace)?;
/// println!("{}", result.summary());
/// for (method, message) in &result.failures {
///     eprintln!("{method}: {message}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DeobfuscationResult {
    /// All events from the run.
    pub events: EventLog,
    /// Methods changed by at least one pass.
    pub changed_methods: Vec<MethodKey>,
    /// Methods restored to their original body, with the failure message.
    pub failures: Vec<(MethodKey, String)>,
    /// Passes in the order they ran.
    pub passes: Vec<&'static str>,
    /// Number of pipeline iterations.
    pub iterations: usize,
    /// Total processing time.
    pub total_time: Duration,
}

impl DeobfuscationResult {
    /// Creates a result holding only `events`.
    #[must_use]
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            changed_methods: Vec::new(),
            failures: Vec::new(),
            passes: Vec::new(),
            iterations: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Sets timing and iteration info.
    #[must_use]
    pub fn with_timing(mut self, time: Duration, iterations: usize) -> Self {
        self.total_time = time;
        self.iterations = iterations;
        self
    }

    /// Returns `true` if no method failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Computes statistics derived from the event log.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        DerivedStats::from_log(&self.events)
            .with_time(self.total_time)
            .with_iterations(self.iterations)
    }

    /// Human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Multi-line summary including the pipeline and failures.
    #[must_use]
    pub fn detailed_summary(&self) -> String {
        let mut out = format!(
            "Deobfuscation complete: {}\nPipeline: {}",
            self.stats().summary(),
            self.passes.join(" -> ")
        );
        for (method, message) in &self.failures {
            out.push_str(&format!("\nRestored {method}: {message}"));
        }
        out
    }
}
