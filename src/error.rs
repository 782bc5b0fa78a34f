use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three groups. Structural errors mean a method body broke one of its
/// invariants (a dangling label, an inverted exception range, a frame array that does not match
/// the instruction count). Pipeline errors come from pass registration and scheduling. Transform
/// errors wrap either of the former with the pass and method in which they surfaced.
///
/// Analysis that is merely inconclusive, or an evaluation that ran out of its step budget, is
/// *not* an error: passes treat both as "leave this site alone".
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::Malformed`] - Method body violates a structural invariant
/// - [`Error::LabelInUse`] - Attempted to delete a label that is still referenced
/// - [`Error::InvalidDescriptor`] - A type or method descriptor could not be parsed
/// - [`Error::FrameMismatch`] - A frame provider returned the wrong number of frames
///
/// ## Pipeline Errors
/// - [`Error::Transform`] - A pass failed on a specific method
/// - [`Error::UnknownPass`] - A pass name could not be resolved
/// - [`Error::DependencyCycle`] - Hard pass dependencies form a cycle
///
/// ## Analysis Errors
/// - [`Error::Analysis`] - Frame computation failed outright
/// - [`Error::RecursionLimit`] - Maximum recursion depth exceeded
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use bytefold::{Error, assembly::MethodBuilder};
///
/// let result = MethodBuilder::new("Demo", "run", "()V")
///     .goto("missing")
///     .build();
///
/// match result {
///     Err(Error::Malformed { message, .. }) => assert!(message.contains("missing")),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is damaged and cannot be processed.
    ///
    /// This error indicates that a structural invariant of a method body does not hold, for
    /// example a jump whose target is not a label of the same body, or an exception range whose
    /// end precedes its start. The error includes the source location where the violation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A label cannot be removed because it is still referenced.
    ///
    /// Labels anchor jumps, switch cases, exception ranges and local variable ranges. They can
    /// only be deleted once every reference has been retargeted or dropped.
    #[error("Label {0} is still referenced")]
    LabelInUse(usize),

    /// A field, method or type descriptor could not be parsed.
    #[error("Invalid descriptor - {0}")]
    InvalidDescriptor(String),

    /// A frame provider returned a frame array that does not match the instruction count.
    #[error("Frame array length mismatch - expected {expected}, got {actual}")]
    FrameMismatch {
        /// Number of instructions in the analysed body
        expected: usize,
        /// Number of frames returned
        actual: usize,
    },

    /// Frame analysis failed for the method.
    ///
    /// Raised by frame providers when the body cannot be interpreted at all, such as on stack
    /// underflow or a merge of incompatible stack heights.
    #[error("Analysis failed - {0}")]
    Analysis(String),

    /// A pass failed while transforming a method.
    ///
    /// The wrapped error is the underlying structural or analysis failure.
    #[error("Pass '{pass}' failed on {method}: {source}")]
    Transform {
        /// Name of the pass that failed
        pass: String,
        /// Display form of the method being transformed
        method: String,
        /// The underlying cause
        source: Box<Error>,
    },

    /// A pass name could not be resolved against the registry.
    #[error("Unknown pass - {0}")]
    UnknownPass(String),

    /// The hard dependencies of the requested passes form a cycle.
    ///
    /// The associated value names the pass at which the cycle was detected.
    #[error("Pass dependency cycle detected at '{0}'")]
    DependencyCycle(String),

    /// Recursion limit reached.
    ///
    /// Call evaluation follows static callees recursively. A maximum depth is enforced to keep
    /// mutually recursive callees from exhausting the stack.
    ///
    /// The associated value shows the recursion limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex or rwlock that is in an invalid state.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Wraps this error with the pass and method it surfaced in.
    ///
    /// Errors that already carry transform context are returned unchanged so that the innermost
    /// pass stays attributed.
    #[must_use]
    pub fn in_pass(self, pass: &str, method: impl ToString) -> Self {
        match self {
            Error::Transform { .. } => self,
            other => Error::Transform {
                pass: pass.to_string(),
                method: method.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` if this error reports a structural invariant violation.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        match self {
            Error::Malformed { .. }
            | Error::LabelInUse(_)
            | Error::InvalidDescriptor(_)
            | Error::FrameMismatch { .. } => true,
            Error::Transform { source, .. } => source.is_structural(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_pass_wraps_once() {
        let err = malformed_error!("bad range {}", 3).in_pass("dead-code-removal", "A.b()V");
        let err = err.in_pass("goto-inlining", "A.b()V");
        match &err {
            Error::Transform { pass, .. } => assert_eq!(pass, "dead-code-removal"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_structural());
    }

    #[test]
    fn test_display() {
        let err = Error::FrameMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Frame array length mismatch - expected 4, got 3"
        );
        assert!(!Error::UnknownPass("x".into()).is_structural());
    }
}
