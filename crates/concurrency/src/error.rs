//! Error types for proc threads and the pool

use thiserror::Error;

/// Result alias for thread operations
pub type ThreadResult<T> = std::result::Result<T, ThreadError>;

/// Errors raised by proc threads, their bodies and the pool
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThreadError {
    /// Cancellation was requested and observed
    #[error("cancelled")]
    Cancelled,

    /// A wait exceeded its deadline
    #[error("timed out after {0} ms")]
    TimedOut(u64),

    /// Argument format or argument values do not match
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Operation not allowed in the thread's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The body failed
    #[error("failed: {0}")]
    Failed(String),

    /// The body panicked
    #[error("signalled: {0}")]
    Signalled(String),

    /// The thread has been destroyed
    #[error("proc thread destroyed")]
    Destroyed,

    /// The pool has been shut down
    #[error("thread pool is shut down")]
    PoolShutdown,

    /// The pool queue is full
    #[error("thread pool queue is full")]
    Backpressure,
}

impl ThreadError {
    /// Create a failure from any displayable error
    pub fn failed(e: impl std::fmt::Display) -> Self {
        ThreadError::Failed(e.to_string())
    }
}

impl From<nirva_core::Error> for ThreadError {
    fn from(e: nirva_core::Error) -> Self {
        match e {
            nirva_core::Error::InvalidFormat(msg) => ThreadError::InvalidArgs(msg),
            other => ThreadError::Failed(other.to_string()),
        }
    }
}
