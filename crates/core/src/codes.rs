//! Result and response codes
//!
//! Condition results and request responses carry numeric codes that other
//! code compares against; each enum converts to and from its code.

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CondResult {
    /// Condition could not be evaluated as written
    Invalid,
    /// Evaluation failed
    Error,
    /// Condition is false
    Fail,
    /// Condition is true
    Success,
    /// Not decidable yet; retry later
    WaitRetry,
    /// Treat as satisfied regardless of other conditions
    Force,
    /// Give up on the whole operation
    Abandon,
}

impl CondResult {
    /// Numeric code
    pub fn code(&self) -> i32 {
        match self {
            CondResult::Invalid => -2,
            CondResult::Error => -1,
            CondResult::Fail => 0,
            CondResult::Success => 1,
            CondResult::WaitRetry => 2,
            CondResult::Force => 16,
            CondResult::Abandon => 17,
        }
    }

    /// Decode a numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -2 => CondResult::Invalid,
            -1 => CondResult::Error,
            0 => CondResult::Fail,
            1 => CondResult::Success,
            2 => CondResult::WaitRetry,
            16 => CondResult::Force,
            17 => CondResult::Abandon,
            _ => return None,
        })
    }

    /// True for Success and Force
    pub fn is_satisfied(&self) -> bool {
        matches!(self, CondResult::Success | CondResult::Force)
    }

    /// Map a boolean
    pub fn from_bool(b: bool) -> Self {
        if b {
            CondResult::Success
        } else {
            CondResult::Fail
        }
    }
}

/// Answer to a request hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestResponse {
    /// Refused
    No,
    /// Granted
    Yes,
    /// Not now; ask again
    WaitRetry,
    /// Refused unless the requester holds a privilege
    NeedsPrivilege,
    /// Forwarded to another object which will answer
    Proxied,
}

impl RequestResponse {
    /// Numeric code
    pub fn code(&self) -> i32 {
        match self {
            RequestResponse::No => 0,
            RequestResponse::Yes => 1,
            RequestResponse::WaitRetry => 2,
            RequestResponse::NeedsPrivilege => 17,
            RequestResponse::Proxied => 18,
        }
    }

    /// Decode a numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => RequestResponse::No,
            1 => RequestResponse::Yes,
            2 => RequestResponse::WaitRetry,
            17 => RequestResponse::NeedsPrivilege,
            18 => RequestResponse::Proxied,
            _ => return None,
        })
    }

    /// True only for Yes
    pub fn is_yes(&self) -> bool {
        matches!(self, RequestResponse::Yes)
    }
}

/// Lifecycle status of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxStatus {
    /// Not yet configured
    None,
    /// Capacities being chosen
    Configuring,
    /// Capacity subset accepted
    CapsValid,
    /// Trajectory being resolved
    Negotiating,
    /// Ready to run
    Ready,
    /// Held back until its inputs are available
    Deferred,
    /// Waiting in the pool queue
    Queued,
    /// Inputs being prepared
    Preparing,
    /// Executing segments
    Running,
    /// Waiting on a condition
    Waiting,
    /// Paused on request
    Paused,
    /// Waiting longer than the blocked limit
    Blocked,
    /// Finished normally
    Success,
    /// Stopped on request
    Cancelled,
    /// Stopped by a failure
    Error,
    /// A wait exceeded its deadline
    TimedOut,
}

impl TxStatus {
    /// Numeric code
    pub fn code(&self) -> i32 {
        match self {
            TxStatus::None => 0,
            TxStatus::Configuring => 1,
            TxStatus::CapsValid => 2,
            TxStatus::Negotiating => 3,
            TxStatus::Ready => 4,
            TxStatus::Deferred => 5,
            TxStatus::Queued => 8,
            TxStatus::Preparing => 9,
            TxStatus::Running => 16,
            TxStatus::Waiting => 17,
            TxStatus::Paused => 18,
            TxStatus::Blocked => 19,
            TxStatus::Success => 32,
            TxStatus::Cancelled => 33,
            TxStatus::Error => 34,
            TxStatus::TimedOut => 35,
        }
    }

    /// Decode a numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => TxStatus::None,
            1 => TxStatus::Configuring,
            2 => TxStatus::CapsValid,
            3 => TxStatus::Negotiating,
            4 => TxStatus::Ready,
            5 => TxStatus::Deferred,
            8 => TxStatus::Queued,
            9 => TxStatus::Preparing,
            16 => TxStatus::Running,
            17 => TxStatus::Waiting,
            18 => TxStatus::Paused,
            19 => TxStatus::Blocked,
            32 => TxStatus::Success,
            33 => TxStatus::Cancelled,
            34 => TxStatus::Error,
            35 => TxStatus::TimedOut,
            _ => return None,
        })
    }

    /// True for the four terminal statuses
    pub fn is_final(&self) -> bool {
        self.code() >= 32
    }

    /// Running or one of its recoverable sub-states
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TxStatus::Running | TxStatus::Waiting | TxStatus::Paused | TxStatus::Blocked
        )
    }
}

/// Result stored on a transform once it stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxResult {
    /// Generic failure
    Error,
    /// Cancelled before completion
    Cancelled,
    /// Input data did not arrive in time
    DataTimedOut,
    /// A synchronisation wait timed out
    SyncTimedOut,
    /// The wrong contract was actioned
    ContractWasWrong,
    /// Mandatory inputs or capacities were missing
    ContractBroken,
    /// Ran but did not produce its outputs
    Unfulfilled,
    /// No valid next segment
    TrajectoryInvalid,
    /// No result yet
    None,
    /// Completed
    Success,
    /// Completed without the intended effect
    Failed,
    /// Parked, may be run again
    Idling,
}

impl TxResult {
    /// Numeric code
    pub fn code(&self) -> i32 {
        match self {
            TxResult::Error => -1,
            TxResult::Cancelled => -2,
            TxResult::DataTimedOut => -3,
            TxResult::SyncTimedOut => -4,
            TxResult::ContractWasWrong => -5,
            TxResult::ContractBroken => -6,
            TxResult::Unfulfilled => -7,
            TxResult::TrajectoryInvalid => -8,
            TxResult::None => 0,
            TxResult::Success => 1,
            TxResult::Failed => 2,
            TxResult::Idling => 3,
        }
    }

    /// Decode a numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => TxResult::Error,
            -2 => TxResult::Cancelled,
            -3 => TxResult::DataTimedOut,
            -4 => TxResult::SyncTimedOut,
            -5 => TxResult::ContractWasWrong,
            -6 => TxResult::ContractBroken,
            -7 => TxResult::Unfulfilled,
            -8 => TxResult::TrajectoryInvalid,
            0 => TxResult::None,
            1 => TxResult::Success,
            2 => TxResult::Failed,
            3 => TxResult::Idling,
            _ => return None,
        })
    }

    /// Negative codes are failures
    pub fn is_failure(&self) -> bool {
        self.code() < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cond_codes_roundtrip() {
        for c in [-2, -1, 0, 1, 2, 16, 17] {
            assert_eq!(CondResult::from_code(c).unwrap().code(), c);
        }
        assert_eq!(CondResult::from_code(3), None);
    }

    #[test]
    fn test_cond_satisfied() {
        assert!(CondResult::Success.is_satisfied());
        assert!(CondResult::Force.is_satisfied());
        assert!(!CondResult::WaitRetry.is_satisfied());
        assert_eq!(CondResult::from_bool(false), CondResult::Fail);
    }

    #[test]
    fn test_request_codes_roundtrip() {
        for c in [0, 1, 2, 17, 18] {
            assert_eq!(RequestResponse::from_code(c).unwrap().code(), c);
        }
        assert!(RequestResponse::Yes.is_yes());
        assert!(!RequestResponse::Proxied.is_yes());
    }

    #[test]
    fn test_tx_codes_roundtrip() {
        for c in [0, 1, 2, 3, 4, 5, 8, 9, 16, 17, 18, 19, 32, 33, 34, 35] {
            assert_eq!(TxStatus::from_code(c).unwrap().code(), c);
        }
        assert_eq!(TxStatus::from_code(6), None);
        for c in -8..=3 {
            assert_eq!(TxResult::from_code(c).unwrap().code(), c);
        }
        assert!(TxResult::TrajectoryInvalid.is_failure());
        assert!(!TxResult::Success.is_failure());
        assert!(TxStatus::TimedOut.is_final());
        assert!(TxStatus::Blocked.is_active());
        assert!(!TxStatus::Preparing.is_final());
    }
}
