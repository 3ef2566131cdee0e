//! Callback records and registration options

use crate::event::HookEvent;
use nirva_core::{RequestResponse, Uid};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// Identifies one registered callback within a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookHandle(pub u64);

impl fmt::Display for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

nirva_core::flag_set! {
    /// How a callback is added to a stack
    pub struct AddMode: u32 {
        /// Reject if a callback with the same name is present
        const UNIQUE_FUNC = 1 << 0;
        /// Reject if a callback with the same name and data key is present
        const UNIQUE_DATA = 1 << 1;
        /// Replace the data key of the first same-name callback in place
        const REPLACE = (1 << 0) | (1 << 1);
        /// Insert at the front of the stack
        const PRIORITY = 1 << 2;
        /// Remove after the first run
        const ONE_SHOT = 1 << 3;
        /// Remove when the callback returns false
        const REMOVE_ON_FALSE = 1 << 4;
        /// Remove a same-name callback if present, otherwise add
        const TOGGLE = 1 << 5;
    }
}

nirva_core::flag_set! {
    /// Per-callback status
    pub struct CallbackStatus: u32 {
        /// Skipped by triggers
        const BLOCKED = 1 << 0;
        /// Has run at least once
        const ACTIONED = 1 << 2;
    }
}

/// Observational or veto callback
pub type CheckFn = Arc<dyn Fn(&HookEvent) -> bool + Send + Sync>;

/// Request callback
pub type RespondFn = Arc<dyn Fn(&HookEvent) -> RequestResponse + Send + Sync>;

/// The callable part of a callback
#[derive(Clone)]
pub enum HookCallback {
    /// Returns true to accept, false to refuse
    Check(CheckFn),
    /// Answers a request
    Respond(RespondFn),
}

impl HookCallback {
    pub(crate) fn check(&self, ev: &HookEvent) -> bool {
        match self {
            HookCallback::Check(f) => f(ev),
            HookCallback::Respond(f) => f(ev).is_yes(),
        }
    }

    pub(crate) fn respond(&self, ev: &HookEvent) -> RequestResponse {
        match self {
            HookCallback::Check(f) => {
                if f(ev) {
                    RequestResponse::Yes
                } else {
                    RequestResponse::No
                }
            }
            HookCallback::Respond(f) => f(ev),
        }
    }
}

impl fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookCallback::Check(_) => f.write_str("HookCallback::Check"),
            HookCallback::Respond(_) => f.write_str("HookCallback::Respond"),
        }
    }
}

/// Builder for a callback registration
///
/// ```
/// use nirva_hooks::{AddMode, Callback};
/// let cb = Callback::check("log_change", |_ev| true)
///     .data_key("strand:.data")
///     .mode(AddMode::UNIQUE_DATA);
/// assert_eq!(cb.name(), "log_change");
/// ```
#[derive(Debug, Clone)]
pub struct Callback {
    pub(crate) name: String,
    pub(crate) data_key: Option<String>,
    pub(crate) mode: AddMode,
    pub(crate) registrant: Option<Uid>,
    pub(crate) func: HookCallback,
}

impl Callback {
    /// Callback returning a boolean
    pub fn check<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HookEvent) -> bool + Send + Sync + 'static,
    {
        Self::from_fn(name, HookCallback::Check(Arc::new(f)))
    }

    /// Callback answering a request
    pub fn respond<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HookEvent) -> RequestResponse + Send + Sync + 'static,
    {
        Self::from_fn(name, HookCallback::Respond(Arc::new(f)))
    }

    fn from_fn(name: impl Into<String>, func: HookCallback) -> Self {
        Self {
            name: name.into(),
            data_key: None,
            mode: AddMode::empty(),
            registrant: None,
            func,
        }
    }

    /// Data key distinguishing registrations of the same function
    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = Some(key.into());
        self
    }

    /// Registration mode
    pub fn mode(mut self, mode: AddMode) -> Self {
        self.mode = mode;
        self
    }

    /// Object registering the callback (checked by self-only stacks)
    pub fn registrant(mut self, uid: Uid) -> Self {
        self.registrant = Some(uid);
        self
    }

    /// Callback name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A callback as stored in a stack
#[derive(Debug, Clone)]
pub(crate) struct CallbackRecord {
    pub handle: HookHandle,
    pub name: String,
    pub data_key: Option<String>,
    pub mode: AddMode,
    pub status: CallbackStatus,
    /// Threads currently inside this callback
    pub running: SmallVec<[ThreadId; 2]>,
    pub func: HookCallback,
}

impl CallbackRecord {
    pub fn matches(&self, name: &str, data_key: Option<&str>) -> bool {
        self.name == name && (data_key.is_none() || self.data_key.as_deref() == data_key)
    }
}

/// Read-only view of a registered callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackInfo {
    /// Handle
    pub handle: HookHandle,
    /// Name
    pub name: String,
    /// Data key
    pub data_key: Option<String>,
    /// Status bits
    pub status: CallbackStatus,
}
