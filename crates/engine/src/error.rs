//! Transform errors
//!
//! Failures while negotiating or running a transform. Each variant maps to
//! the `TX_RESULT` code stored on the transform and to its final status.

use nirva_concurrency::ThreadError;
use nirva_core::{TxResult, TxStatus};
use thiserror::Error;

/// Result type alias for transform operations
pub type TxOutcome<T> = std::result::Result<T, TxError>;

/// Errors raised while actioning a contract or running its trajectory
#[derive(Debug, Error)]
pub enum TxError {
    /// Mandatory input missing or a required connection broken
    #[error("Contract breached: {0}")]
    ContractBroken(String),

    /// Chosen capacities rejected by the contract
    #[error("Invalid capacities: {0}")]
    InvalidCaps(String),

    /// No valid next segment
    #[error("Trajectory invalid: {0}")]
    TrajectoryInvalid(String),

    /// Array-size helper failed or returned nonsense
    #[error("Array size unresolved for '{0}'")]
    ArraySize(String),

    /// Native call parameters did not match the mapped attributes
    #[error("Marshaling mismatch: {0}")]
    Marshal(String),

    /// Output not produced
    #[error("Unfulfilled: {0}")]
    Unfulfilled(String),

    /// Cancelled at a checkpoint
    #[error("Cancelled")]
    Cancelled,

    /// A synchronisation wait timed out
    #[error("Sync wait timed out after {0} ms")]
    SyncTimedOut(u64),

    /// Input data did not arrive in time
    #[error("Data wait timed out after {0} ms")]
    DataTimedOut(u64),

    /// Functional reported a failure
    #[error("Functional '{name}' failed: {reason}")]
    Functional {
        /// Functional name
        name: String,
        /// Failure text
        reason: String,
    },

    /// Bundle or attribute operation failed
    #[error(transparent)]
    Bundle(#[from] nirva_core::Error),

    /// Thread or pool failure
    #[error("Thread error: {0}")]
    Thread(ThreadError),
}

impl TxError {
    /// Helper for functional failures
    pub fn functional(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TxError::Functional {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Result code stored on the transform
    pub fn result(&self) -> TxResult {
        match self {
            TxError::ContractBroken(_) => TxResult::ContractBroken,
            TxError::InvalidCaps(_) => TxResult::ContractWasWrong,
            TxError::TrajectoryInvalid(_) => TxResult::TrajectoryInvalid,
            TxError::Unfulfilled(_) => TxResult::Unfulfilled,
            TxError::Cancelled => TxResult::Cancelled,
            TxError::SyncTimedOut(_) => TxResult::SyncTimedOut,
            TxError::DataTimedOut(_) => TxResult::DataTimedOut,
            TxError::Thread(ThreadError::Cancelled) => TxResult::Cancelled,
            TxError::Thread(ThreadError::TimedOut(_)) => TxResult::SyncTimedOut,
            TxError::ArraySize(_)
            | TxError::Marshal(_)
            | TxError::Functional { .. }
            | TxError::Bundle(_)
            | TxError::Thread(_) => TxResult::Error,
        }
    }

    /// Final status of a transform stopped by this error
    pub fn status(&self) -> TxStatus {
        match self.result() {
            TxResult::Cancelled => TxStatus::Cancelled,
            TxResult::SyncTimedOut | TxResult::DataTimedOut => TxStatus::TimedOut,
            _ => TxStatus::Error,
        }
    }

    /// True for failures detected before any segment ran
    pub fn is_breach(&self) -> bool {
        matches!(self, TxError::ContractBroken(_) | TxError::InvalidCaps(_))
    }
}

impl From<ThreadError> for TxError {
    fn from(e: ThreadError) -> Self {
        match e {
            ThreadError::Cancelled => TxError::Cancelled,
            ThreadError::TimedOut(ms) => TxError::SyncTimedOut(ms),
            other => TxError::Thread(other),
        }
    }
}

impl From<&TxError> for ThreadError {
    fn from(e: &TxError) -> Self {
        match e {
            TxError::Cancelled => ThreadError::Cancelled,
            TxError::SyncTimedOut(ms) | TxError::DataTimedOut(ms) => ThreadError::TimedOut(*ms),
            other => ThreadError::failed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(
            TxError::ContractBroken("b".into()).result().code(),
            -6
        );
        assert_eq!(TxError::TrajectoryInvalid("x".into()).result().code(), -8);
        assert_eq!(TxError::Cancelled.result(), TxResult::Cancelled);
        assert_eq!(TxError::SyncTimedOut(5).status(), TxStatus::TimedOut);
        assert_eq!(TxError::Marshal("n".into()).status(), TxStatus::Error);
    }

    #[test]
    fn test_thread_error_conversions() {
        assert!(matches!(TxError::from(ThreadError::Cancelled), TxError::Cancelled));
        assert!(matches!(
            TxError::from(ThreadError::TimedOut(7)),
            TxError::SyncTimedOut(7)
        ));
        assert_eq!(ThreadError::from(&TxError::Cancelled), ThreadError::Cancelled);
        assert!(matches!(
            ThreadError::from(&TxError::functional("add", "overflow")),
            ThreadError::Failed(_)
        ));
    }

    #[test]
    fn test_breach() {
        assert!(TxError::InvalidCaps("video".into()).is_breach());
        assert!(!TxError::Cancelled.is_breach());
    }
}
