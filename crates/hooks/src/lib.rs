//! Hook dispatch for the nirva runtime
//!
//! Every object carries a [`HookDispatcher`]: ordered callback stacks keyed by
//! an open [`HookId`](nirva_core::HookId). Three base patterns are supported:
//! - data hooks: a "before" stack that can veto a change, and an "after"
//!   stack that only observes it
//! - request hooks: callbacks answer YES, NO, WAIT_RETRY, NEEDS_PRIVILEGE or
//!   PROXIED
//! - spontaneous hooks: lifecycle and status edges, optionally dispatched in
//!   parallel

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod dispatcher;
pub mod event;

pub use callback::{AddMode, Callback, CallbackInfo, CallbackStatus, HookCallback, HookHandle};
pub use dispatcher::{AddOutcome, HookDispatcher, RetryPolicy};
pub use event::{HookEvent, HookPayload};
