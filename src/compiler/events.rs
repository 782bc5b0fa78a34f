//! Unified event logging for the pass pipeline.
//!
//! Every pass reports what it changed by appending events to an [`EventLog`]. The log is
//! append-only and lock-free, so workers processing different methods can record into the same
//! log through shared references. Events can be inspected for debugging or safely ignored.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event (change, warning, info, etc.)
//! - [`EventLog`] - Collection of events with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//! - [`DerivedStats`] - Counters computed from a log
//!
//! # Example
//!
//! ```rust
//! use bytefold::assembly::MethodKey;
//! use bytefold::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! let method = MethodKey::new("Demo", "run", "()V");
//!
//! log.record(EventKind::ConstantFolded)
//!     .at(method.clone(), 3)
//!     .message("2 + 3 -> 5");
//! log.info("starting pass: constant-folding");
//!
//! assert_eq!(log.count_kind(EventKind::ConstantFolded), 1);
//! assert_eq!(log.summary(), "1 constant folded");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::assembly::MethodKey;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Unreachable instructions were removed.
    DeadCodeRemoved,
    /// A goto was removed or its target block moved in place.
    GotoInlined,
    /// A computation was replaced by its constant result or simplified.
    ConstantFolded,
    /// A stack shuffle was rewritten as explicit pushes or removed.
    StackNormalized,
    /// A conditional branch or switch was made unconditional.
    BranchSimplified,
    /// An opaque predicate was identified and removed.
    OpaquePredicateRemoved,
    /// A store or increment whose value is never read was removed.
    DeadStoreRemoved,
    /// A redundant copy variable was replaced by its source.
    CopyPropagated,
    /// A load of a local holding a known constant was replaced by the constant.
    ConstantLocalInlined,
    /// An exception range that can never catch anything was removed.
    TryCatchRemoved,
    /// A duplicated handler block was redirected to an identical one.
    HandlerMerged,

    /// A bounded evaluation ran out of steps or could not decide.
    EvaluationAborted,
    /// A pass failed on a method and the method was restored.
    PassFailed,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::DeadCodeRemoved => "dead code removed",
            Self::GotoInlined => "goto inlined",
            Self::ConstantFolded => "constant folded",
            Self::StackNormalized => "stack normalized",
            Self::BranchSimplified => "branch simplified",
            Self::OpaquePredicateRemoved => "opaque predicate removed",
            Self::DeadStoreRemoved => "dead store removed",
            Self::CopyPropagated => "copy propagated",
            Self::ConstantLocalInlined => "constant local inlined",
            Self::TryCatchRemoved => "try-catch removed",
            Self::HandlerMerged => "handler merged",
            // Engine
            Self::EvaluationAborted => "evaluation aborted",
            Self::PassFailed => "pass failed",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::DeadCodeRemoved
                | Self::GotoInlined
                | Self::ConstantFolded
                | Self::StackNormalized
                | Self::BranchSimplified
                | Self::OpaquePredicateRemoved
                | Self::DeadStoreRemoved
                | Self::CopyPropagated
                | Self::ConstantLocalInlined
                | Self::TryCatchRemoved
                | Self::HandlerMerged
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error/failure).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::Info | Self::Warning | Self::Error | Self::PassFailed | Self::EvaluationAborted
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<MethodKey>,
    /// Instruction position within the method at the time of the change.
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    /// Creates a new event with the given kind and message.
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.method, self.location) {
            (Some(method), Some(at)) => write!(f, "[{}] {method}@{at}: {}", self.kind, self.message),
            (Some(method), None) => write!(f, "[{}] {method}: {}", self.kind, self.message),
            _ => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added
/// to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodKey>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and location where the event occurred.
    pub fn at(mut self, method: MethodKey, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets only the method (for method-level events without specific location).
    pub fn method(mut self, method: MethodKey) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the location (for when method is already set or not applicable).
    pub fn location(mut self, location: usize) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the location when one is known.
    pub fn maybe_location(mut self, location: Option<usize>) -> Self {
        self.location = location.or(self.location);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from a pipeline run.
///
/// Provides methods for recording events, querying them, and generating
/// summaries. Statistics are derived from the events rather than tracked
/// separately.
///
/// This type is thread-safe: events can be appended concurrently from
/// multiple threads using shared references (`&self`).
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        for (_, event) in &self.events {
            new_log.events.push(event.clone());
        }
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is automatically added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of every event in `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| if e.kind == kind { Some(e) } else { None })
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method<'a>(&'a self, method: &'a MethodKey) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.method.as_ref() == Some(method)).then_some(e))
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(|(_, e)| e.kind.is_transformation().then_some(e))
    }

    /// Takes ownership of the events by cloning into a new EventLog.
    ///
    /// `boxcar::Vec` is append-only and doesn't support draining.
    #[must_use]
    pub fn take(&self) -> EventLog {
        self.clone()
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of transformation events.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| e.kind.is_transformation())
            .count()
    }

    /// Returns the number of unique methods with transformation events.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| e.kind.is_transformation())
            .filter_map(|(_, e)| e.method.as_ref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of all events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let counts = self.count_by_kind();

        // Only show transformation counts in summary
        let mut parts: Vec<String> = counts
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl Extend<Event> for EventLog {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        for event in iter {
            self.events.push(event);
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

/// Statistics derived from an EventLog.
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Number of methods that had any transformations.
    pub methods_transformed: usize,
    /// Number of dead-code removals.
    pub dead_code_removed: usize,
    /// Number of gotos inlined.
    pub gotos_inlined: usize,
    /// Number of constants folded.
    pub constants_folded: usize,
    /// Number of stack shuffles normalized.
    pub stack_normalized: usize,
    /// Number of branches simplified.
    pub branches_simplified: usize,
    /// Number of opaque predicates removed.
    pub opaque_predicates_removed: usize,
    /// Number of dead stores removed.
    pub dead_stores_removed: usize,
    /// Number of copies propagated.
    pub copies_propagated: usize,
    /// Number of exception ranges removed.
    pub try_catches_removed: usize,
    /// Number of handlers merged.
    pub handlers_merged: usize,
    /// Number of methods restored after a pass failure.
    pub failures: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of pipeline iterations.
    pub iterations: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            dead_code_removed: get(EventKind::DeadCodeRemoved),
            gotos_inlined: get(EventKind::GotoInlined),
            constants_folded: get(EventKind::ConstantFolded)
                + get(EventKind::ConstantLocalInlined),
            stack_normalized: get(EventKind::StackNormalized),
            branches_simplified: get(EventKind::BranchSimplified),
            opaque_predicates_removed: get(EventKind::OpaquePredicateRemoved),
            dead_stores_removed: get(EventKind::DeadStoreRemoved),
            copies_propagated: get(EventKind::CopyPropagated),
            try_catches_removed: get(EventKind::TryCatchRemoved),
            handlers_merged: get(EventKind::HandlerMerged),
            failures: get(EventKind::PassFailed),
            warnings: get(EventKind::Warning),
            iterations: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Sets the number of iterations.
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let counters = [
            (self.methods_transformed, "methods"),
            (self.dead_code_removed, "dead code removals"),
            (self.gotos_inlined, "gotos inlined"),
            (self.constants_folded, "constants folded"),
            (self.stack_normalized, "stack ops normalized"),
            (self.branches_simplified, "branches simplified"),
            (self.opaque_predicates_removed, "opaque predicates"),
            (self.dead_stores_removed, "dead stores"),
            (self.copies_propagated, "copies propagated"),
            (self.try_catches_removed, "try-catches removed"),
            (self.handlers_merged, "handlers merged"),
            (self.failures, "failures"),
            (self.warnings, "warnings"),
        ];
        let parts: Vec<String> = counters
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, label)| format!("{n} {label}"))
            .collect();

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };
        format!(
            "{stats} ({} iterations, {:.2?})",
            self.iterations, self.total_time
        )
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MethodKey {
        MethodKey::new("A", "m", "()V")
    }

    #[test]
    fn test_event_log_basic() {
        let log = EventLog::new();
        assert!(log.is_empty());

        log.record(EventKind::ConstantFolded)
            .at(key(), 0)
            .message("folded");
        log.record(EventKind::DeadStoreRemoved).method(key());
        log.info("info");

        assert_eq!(log.len(), 3);
        assert!(log.has(EventKind::ConstantFolded));
        assert!(!log.has(EventKind::GotoInlined));
        assert_eq!(log.count_kind(EventKind::DeadStoreRemoved), 1);
        assert_eq!(log.transformation_count(), 2);
        assert_eq!(log.methods_affected(), 1);
        assert_eq!(log.filter_method(&key()).count(), 2);
    }

    #[test]
    fn test_default_message() {
        let log = EventLog::new();
        log.record(EventKind::TryCatchRemoved).pass("redundant-try-catch-removal");
        let event = log.iter().next().unwrap();
        assert_eq!(event.message, "try-catch removed");
        assert_eq!(event.pass.as_deref(), Some("redundant-try-catch-removal"));
    }

    #[test]
    fn test_merge_and_summary() {
        let a = EventLog::new();
        let b = EventLog::new();
        a.record(EventKind::GotoInlined).at(key(), 1);
        b.record(EventKind::GotoInlined).at(key(), 2);
        b.warn("careful");
        a.merge(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.summary(), "2 goto inlined");

        let stats = DerivedStats::from_log(&a).with_iterations(2);
        assert_eq!(stats.gotos_inlined, 2);
        assert_eq!(stats.warnings, 1);
        assert!(stats.summary().starts_with("1 methods, 2 gotos inlined"));
    }

    #[test]
    fn test_concurrent_record() {
        use rayon::prelude::*;

        let log = EventLog::new();
        (0..64).into_par_iter().for_each(|i| {
            log.record(EventKind::ConstantFolded).at(key(), i);
        });
        assert_eq!(log.count_kind(EventKind::ConstantFolded), 64);
    }
}
