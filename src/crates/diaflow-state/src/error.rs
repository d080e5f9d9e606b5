//! Error types for execution state storage.

use thiserror::Error;

/// Convenience result type using [`StateError`].
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors raised by execution state management and persistence backends.
#[derive(Error, Debug)]
pub enum StateError {
    /// The requested execution does not exist in the store.
    #[error("Execution '{0}' not found")]
    ExecutionNotFound(String),

    /// The requested node has no recorded state within the execution.
    #[error("Node '{node}' not found in execution '{execution}'")]
    NodeNotFound {
        /// Execution the lookup ran against
        execution: String,
        /// Node id that was missing
        node: String,
    },

    /// An illegal status transition was attempted (e.g. completing a
    /// node in a terminal execution).
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Serialization of a state snapshot failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific storage failure (database down, disk full, ...).
    #[error("Storage error: {0}")]
    Storage(String),
}
