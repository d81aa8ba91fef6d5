//! Error Types
//!
//! The engine only orchestrates; it does not isolate faults. Errors returned
//! by user transforms and producers travel back to the evaluation caller as
//! [`GraphError::User`] without being wrapped or inspected.

use thiserror::Error;

/// Boxed error produced by user code (transforms, producers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// Raised by a user-supplied transform or producer.
    #[error("{0}")]
    User(BoxError),

    /// Values were bound to a node that is not an input placeholder.
    #[error("node '{node}' is not an input and cannot be bound")]
    NotAnInput { node: String },

    /// A graph was invoked with the wrong number of positional arguments.
    #[error("graph '{graph}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        graph: String,
        expected: usize,
        got: usize,
    },

    /// An asynchronous stream source was pulled through the synchronous iterator.
    #[error("node '{node}' has an asynchronous source and cannot be iterated synchronously")]
    SyncIterationUnsupported { node: String },

    /// The isolated stream worker could not be launched.
    #[error("failed to launch stream worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// The isolated stream worker panicked.
    #[error("stream worker for node '{node}' panicked")]
    WorkerPanicked { node: String },

    /// A dependency task was cancelled before it produced a result.
    #[error("dependency task of node '{node}' was cancelled")]
    Cancelled { node: String },

    /// Worker options could not be parsed.
    #[error("invalid worker options: {0}")]
    Config(#[from] serde_json::Error),
}

impl GraphError {
    /// Wrap an error raised by user code.
    ///
    /// ```rust
    /// use graphflow_core::GraphError;
    ///
    /// let err = GraphError::user("division by zero");
    /// assert_eq!(err.to_string(), "division by zero");
    /// ```
    pub fn user(err: impl Into<BoxError>) -> Self {
        Self::User(err.into())
    }
}
