//! Hook numbers
//!
//! `HookId` is an open newtype: the named constants below are the runtime's
//! own extension points, and applications may define further ids at or above
//! [`HookId::FIRST_CUSTOM`]. Each id maps to one of the three base patterns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base pattern of a hook stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPattern {
    /// Fires before a value change; any callback may veto it
    DataBefore,
    /// Fires after a value change; purely observational
    DataAfter,
    /// Inter-object request; callbacks answer with a response code
    Request,
    /// Lifecycle or status edge
    Spontaneous,
}

crate::flag_set! {
    /// Stack header details
    pub struct HookDetails: u32 {
        /// Only the owner of the stack may register callbacks
        const SELF_ONLY = 1 << 0;
        /// Callbacks answering WAIT_RETRY are retried
        const COND_RETRY = 1 << 1;
        /// Each callback is tried at most once, then removed
        const COND_ONCE = 1 << 2;
        /// Stack is evaluated before the underlying change
        const BEFORE = 1 << 3;
        /// Callbacks are native functions rather than closures
        const NATIVE = 1 << 4;
        /// Callbacks run concurrently and the trigger blocks until all return
        const PARALLEL = 1 << 5;
    }
}

/// Hook number
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookId(pub u32);

macro_rules! hook_ids {
    ($($(#[$m:meta])* $name:ident = $v:literal, $pattern:ident;)*) => {
        impl HookId {
            $(
                $(#[$m])*
                pub const $name: HookId = HookId($v);
            )*

            /// Symbolic name of a known hook id
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($v => Some(stringify!($name)),)*
                    _ => None,
                }
            }

            fn builtin_pattern(&self) -> Option<HookPattern> {
                match self.0 {
                    $($v => Some(HookPattern::$pattern),)*
                    _ => None,
                }
            }

            /// Every built-in hook id
            pub fn all_builtin() -> &'static [HookId] {
                &[$(HookId::$name,)*]
            }
        }
    };
}

hook_ids! {
    /// No hook
    NO_HOOK = 0, Spontaneous;
    /// Unrecoverable error in the runtime
    FATAL = 1, Spontaneous;
    /// Runtime is resetting
    RESETTING = 2, Spontaneous;
    /// Object is being destroyed; fires exactly once
    DESTRUCTION = 3, Spontaneous;
    /// A thread is exiting
    THREAD_EXIT = 4, Spontaneous;

    /// Object was created
    OBJECT_CREATED = 8, Spontaneous;
    /// Object instance was copied
    INSTANCE_COPIED = 9, Spontaneous;
    /// Subtype about to change
    MODIFYING_SUBTYPE = 10, DataBefore;
    /// Subtype changed
    SUBTYPE_MODIFIED = 11, DataAfter;
    /// State about to change
    ALTERING_STATE = 12, DataBefore;
    /// State changed
    STATE_ALTERED = 13, DataAfter;
    /// Strand about to be added
    ADDING_STRAND = 14, DataBefore;
    /// Strand about to be deleted
    DELETING_STRAND = 15, DataBefore;
    /// Strand added
    STRAND_ADDED = 16, DataAfter;
    /// Strand deleted
    STRAND_DELETED = 17, DataAfter;
    /// Array item about to be appended
    APPENDING_ITEM = 18, DataBefore;
    /// Array item about to be removed
    REMOVING_ITEM = 19, DataBefore;
    /// Array about to be cleared
    CLEARING_ITEMS = 20, DataBefore;
    /// Array cleared
    ITEMS_CLEARED = 21, DataAfter;
    /// Array item appended
    ITEM_APPENDED = 22, DataAfter;
    /// Array item removed
    ITEM_REMOVED = 23, DataAfter;
    /// Value about to change
    UPDATING_VALUE = 24, DataBefore;
    /// Value changed
    VALUE_UPDATED = 25, DataAfter;

    /// Transform preparing
    PREPARING = 32, Spontaneous;
    /// Transform prepared
    PREPARED = 33, Spontaneous;
    /// Transform started running
    TX_START = 34, Spontaneous;
    /// Paused
    PAUSED = 35, Spontaneous;
    /// Resuming after a pause
    RESUMING = 36, Spontaneous;
    /// Work completed
    COMPLETED = 37, Spontaneous;
    /// All finishing hooks have run
    FINISHED = 38, Spontaneous;
    /// Idle, may be re-queued
    IDLE = 39, Spontaneous;
    /// Deadline exceeded
    TIMED_OUT = 40, Spontaneous;
    /// Failed with an error
    ERROR = 41, Spontaneous;
    /// Cancelled
    CANCELLED = 42, Spontaneous;
    /// Waiting on a sync condition
    TX_WAITING = 43, Spontaneous;
    /// Blocked past the soft threshold
    TX_BLOCKED = 44, Spontaneous;

    /// A contract precondition was breached
    CONTRACT_BREACHED = 48, Spontaneous;
    /// Soft-wait condition set; all callbacks must return true
    SYNC_WAIT = 49, Spontaneous;
    /// Sync announcement
    SYNC_ANNOUNCE = 50, Spontaneous;
    /// Segment finished
    SEGMENT_END = 51, Spontaneous;
    /// Segment starting
    SEGMENT_START = 52, Spontaneous;
    /// Attributes were updated
    ATTRS_UPDATED = 53, Spontaneous;
    /// Preview data available
    DATA_PREVIEW = 54, Spontaneous;
    /// Output data ready; callbacks run in parallel
    DATA_READY = 55, Spontaneous;
    /// A callback is about to be detached from a stack
    HOOK_CB_DETACHING = 56, Spontaneous;
    /// A callback was attached to a stack
    HOOK_CB_ATTACHED = 57, Spontaneous;
    /// Trace point
    TRACE = 58, Spontaneous;

    /// Request for data
    DATA_REQUEST = 64, Request;
    /// Request to destroy
    DESTRUCT_REQUEST = 65, Request;
    /// Request to cancel
    CANCEL_REQUEST = 66, Request;
    /// Request to pause
    PAUSE_REQUEST = 67, Request;
    /// Request to resume
    RESUME_REQUEST = 68, Request;
    /// Request to transfer ownership
    TRANSFER_REQUEST = 69, Request;
    /// Request to undo
    UNDO_REQUEST = 70, Request;
    /// Request to redo
    REDO_REQUEST = 71, Request;
    /// Request for a read-write attribute connection
    ATTR_CONNECT_RW_REQUEST = 72, Request;
    /// Request to substitute one object for another
    SUBSTITUTE_REQUEST = 73, Request;
    /// Request to add a reference
    REF_REQUEST = 74, Request;
    /// Request to drop a reference
    UNREF_REQUEST = 75, Request;
    /// Request to update
    UPDATE_REQUEST = 76, Request;
    /// Request to connect an attribute
    CONNECT_REQUEST = 77, Request;
    /// Request to disconnect an attribute
    DISCONNECT_REQUEST = 78, Request;

    /// Internal use
    INTERNAL_HOOK_0 = 96, Spontaneous;
    /// Internal use
    INTERNAL_HOOK_1 = 97, Spontaneous;
    /// Internal use
    INTERNAL_HOOK_2 = 98, Spontaneous;
    /// Internal use
    INTERNAL_HOOK_3 = 99, Spontaneous;
}

impl HookId {
    /// Number of global hooks (shared by every object)
    pub const N_GLOBAL_HOOKS: u32 = 5;

    /// First id available to applications
    pub const FIRST_CUSTOM: HookId = HookId(0x1000);

    /// Base pattern of this hook
    ///
    /// Custom ids default to the spontaneous pattern; callers choose a
    /// different pattern by triggering through the matching dispatcher method.
    pub fn pattern(&self) -> HookPattern {
        self.builtin_pattern().unwrap_or(HookPattern::Spontaneous)
    }

    /// Default stack details for this hook
    pub fn default_details(&self) -> HookDetails {
        match *self {
            HookId::DATA_READY => HookDetails::PARALLEL,
            HookId::CONNECT_REQUEST
            | HookId::DISCONNECT_REQUEST
            | HookId::ATTR_CONNECT_RW_REQUEST => HookDetails::SELF_ONLY,
            HookId::DATA_REQUEST | HookId::UPDATE_REQUEST => HookDetails::COND_RETRY,
            HookId::DESTRUCTION => HookDetails::COND_ONCE,
            id => match id.pattern() {
                HookPattern::DataBefore => HookDetails::BEFORE,
                _ => HookDetails::empty(),
            },
        }
    }

    /// True for the hooks every object shares
    pub fn is_global(&self) -> bool {
        self.0 < Self::N_GLOBAL_HOOKS
    }

    /// True for application-defined ids
    pub fn is_custom(&self) -> bool {
        *self >= Self::FIRST_CUSTOM
    }
}

impl fmt::Debug for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => write!(f, "HookId({})", n),
            None => write!(f, "HookId({})", self.0),
        }
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "hook#{}", self.0),
        }
    }
}
