//! Error types and error taxonomy for compilation and execution
//!
//! All fallible operations in this crate return [`Result<T>`] with
//! [`DiagramError`]. Errors carry a machine-readable [`ErrorKind`] that
//! drives propagation policy:
//!
//! ```text
//! DiagramError
//! ├── Validation      - malformed input, bad handles    → never retried
//! ├── Compilation     - compiler diagnostics (facade)   → never retried
//! ├── Configuration   - missing service / key / person  → fatal for node
//! ├── Transient       - timeouts, 429/5xx               → retried
//! ├── NodeExecution   - handler raised                  → node failed
//! ├── Timeout         - per-node timeout expiry         → retried
//! ├── Cancelled       - cooperative cancellation        → execution cancelled
//! ├── CircuitOpen     - breaker tripped for node type   → policy skip
//! ├── Registry        - rule registry constraint        → caller error
//! ├── Internal        - invariant violation             → fatal, logged
//! └── wrapped         - serde_json / serde_yaml / io / state
//! ```
//!
//! The compiler's phase logic reports diagnostics as values
//! ([`CompilationResult`](crate::compile::CompilationResult)); only the
//! `compile()` facade converts them into a [`DiagramError::Compilation`].
//!
//! # Examples
//!
//! ```rust
//! use diaflow_core::error::{DiagramError, ErrorKind};
//!
//! let err = DiagramError::node_execution("llm_call", "rate limited (429)");
//! assert_eq!(format!("{}", err), "Node 'llm_call' execution failed: rate limited (429)");
//!
//! let timeout = DiagramError::Timeout { operation: "api_job".into(), duration_ms: 5000 };
//! assert_eq!(timeout.kind(), ErrorKind::Transient);
//! assert!(timeout.is_retryable());
//! ```

use thiserror::Error;

/// Convenience result type using [`DiagramError`].
pub type Result<T> = std::result::Result<T, DiagramError>;

/// Machine-readable error classification per the failure model.
///
/// The scheduler consults the kind of a node failure to decide between
/// retry, fatal failure and policy skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, unknown node type, handle parse failure
    Validation,
    /// Missing API key, missing service, unknown person reference
    Configuration,
    /// Network timeout, rate limit, temporary unavailability
    Transient,
    /// Error raised by a node handler
    Handler,
    /// Iteration cap, gated branch, circuit open
    Policy,
    /// Compiler/scheduler invariant violation
    Internal,
}

/// Comprehensive error type for diagram compilation and execution.
#[derive(Error, Debug)]
pub enum DiagramError {
    /// Diagram structure or input validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Compilation produced errors; the message aggregates the phase
    /// diagnostics. Raised only by the `compile()` facade.
    #[error("Compilation failed:\n{0}")]
    Compilation(String),

    /// A handle identifier could not be parsed.
    #[error("Invalid handle id '{handle}': {reason}")]
    Handle {
        /// The offending handle id
        handle: String,
        /// Why it was rejected
        reason: String,
    },

    /// A node handler returned an error.
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node that failed
        node: String,
        /// Error message from the handler
        error: String,
    },

    /// Execution-level failure without a specific node context.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Missing or invalid configuration (service, API key, person, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required service was not registered.
    #[error("Required service '{0}' not found")]
    MissingService(String),

    /// Transient failure that the scheduler may retry.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A guarded operation exceeded its time limit.
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the guarded operation
        operation: String,
        /// Configured limit in milliseconds
        duration_ms: u64,
    },

    /// Execution was cancelled cooperatively.
    #[error("Execution cancelled")]
    Cancelled,

    /// The circuit breaker for a node type is open.
    #[error("Circuit open for node type '{0}'")]
    CircuitOpen(String),

    /// A rule registry constraint was violated (frozen, immutable,
    /// override policy).
    #[error("Rule registry error: {0}")]
    Registry(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error (Light/Readable diagram formats).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure (diagram storage, file ports).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Execution state error.
    #[error("State error: {0}")]
    State(#[from] diaflow_state::StateError),

    /// Compiler/scheduler invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiagramError {
    /// Create a node execution error with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a handle parse error.
    pub fn handle(handle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Handle {
            handle: handle.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error per the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Compilation(_) | Self::Handle { .. } => {
                ErrorKind::Validation
            }
            Self::Configuration(_) | Self::MissingService(_) => ErrorKind::Configuration,
            Self::Transient(_) | Self::Timeout { .. } => ErrorKind::Transient,
            Self::NodeExecution { .. } | Self::Execution(_) => ErrorKind::Handler,
            Self::Cancelled | Self::CircuitOpen(_) => ErrorKind::Policy,
            Self::Registry(_) => ErrorKind::Configuration,
            Self::Serialization(_) | Self::Yaml(_) | Self::Io(_) => ErrorKind::Handler,
            Self::State(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the scheduler should retry the operation.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            DiagramError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DiagramError::Transient("429".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            DiagramError::node_execution("n", "boom").kind(),
            ErrorKind::Handler
        );
        assert_eq!(DiagramError::Cancelled.kind(), ErrorKind::Policy);
        assert_eq!(
            DiagramError::Internal("bug".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_only_transient_retryable() {
        assert!(DiagramError::Transient("x".into()).is_retryable());
        assert!(DiagramError::Timeout {
            operation: "op".into(),
            duration_ms: 10
        }
        .is_retryable());
        assert!(!DiagramError::Validation("x".into()).is_retryable());
        assert!(!DiagramError::node_execution("n", "e").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = DiagramError::handle("a:b:c", "too many delimiters");
        assert_eq!(
            format!("{}", err),
            "Invalid handle id 'a:b:c': too many delimiters"
        );
    }
}
