//! Error types for sandboxed evaluation.

use thiserror::Error;

/// Fixed message for deadline aborts.
pub const TIMEOUT_MESSAGE: &str = "Script execution timed out";

/// Errors that can occur while evaluating a module or rendering a template.
///
/// Reaching for a capability the realm lacks fails as an ordinary
/// [`SandboxError::Script`], usually a `ReferenceError`.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// An exception escaped the sandboxed code. This covers errors thrown by
    /// the author and rejections from host callbacks awaited by the author.
    #[error("{message}")]
    Script {
        /// Error class name (`ReferenceError`, `TypeError`, ...).
        name: String,
        /// The original error text.
        message: String,
        /// Stack trace restricted to frames in the synthetic script.
        stack: Option<String>,
    },

    /// The deadline guard aborted execution.
    #[error("Script execution timed out")]
    Timeout {
        /// Budget that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The realm ran out of heap.
    #[error("V8 heap limit exceeded")]
    HeapLimitExceeded,

    /// Source text exceeds the configured maximum size.
    #[error("source exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// The serialized result exceeds the configured maximum size.
    #[error("output exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// The template could not be compiled.
    #[error("template syntax error on line {line}: {reason}")]
    TemplateSyntax {
        /// 1-based line of the offending tag.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A host value cannot cross into the realm.
    #[error("invalid host value: {reason}")]
    InvalidValue {
        /// What went wrong.
        reason: String,
    },

    /// Host-side failure setting up or driving the realm.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// Result serialization failed.
    #[error("result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether this error came from the deadline guard.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }

    /// The sanitized stack trace, when the error carries one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            SandboxError::Script { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
