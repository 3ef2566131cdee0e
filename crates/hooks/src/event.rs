//! Hook events
//!
//! Every trigger hands its callbacks a [`HookEvent`]: which hook fired, on
//! which object, and a payload describing the transition.

use nirva_core::{HookId, StrandValue, Uid};

/// What changed
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    /// No details
    None,
    /// A strand's contents are changing or have changed
    ValueChange {
        /// Strand name
        strand: String,
        /// Contents before the change
        old: Vec<StrandValue>,
        /// Contents after the change
        new: Vec<StrandValue>,
    },
    /// A strand is being added or deleted
    StrandChange {
        /// Strand name
        strand: String,
    },
    /// An array element is being appended or removed
    ItemChange {
        /// Strand name
        strand: String,
        /// Element index
        index: usize,
        /// Element value, when known
        value: Option<StrandValue>,
    },
    /// A state or status code is changing
    StateChange {
        /// Previous code
        old: i64,
        /// New code
        new: i64,
    },
    /// A request from another object
    Request {
        /// Requesting object, if any
        requester: Option<Uid>,
        /// Request detail, e.g. the attribute to connect
        detail: String,
    },
    /// A callback was attached to, or is being detached from, a stack
    Callback {
        /// Stack the callback belongs to
        hook: HookId,
        /// Callback name
        name: String,
    },
    /// Free-form text (trace points, error messages)
    Text(String),
}

/// A single hook firing
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    /// Hook that fired
    pub hook: HookId,
    /// Object whose stack fired
    pub target: Uid,
    /// Transition details
    pub payload: HookPayload,
}

impl HookEvent {
    /// Event without payload
    pub fn new(hook: HookId, target: Uid) -> Self {
        Self {
            hook,
            target,
            payload: HookPayload::None,
        }
    }

    /// Builder: attach a payload
    pub fn with_payload(mut self, payload: HookPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Strand named by the payload, if any
    pub fn strand(&self) -> Option<&str> {
        match &self.payload {
            HookPayload::ValueChange { strand, .. }
            | HookPayload::StrandChange { strand }
            | HookPayload::ItemChange { strand, .. } => Some(strand),
            _ => None,
        }
    }

    /// New contents for value-change events
    pub fn new_values(&self) -> Option<&[StrandValue]> {
        match &self.payload {
            HookPayload::ValueChange { new, .. } => Some(new),
            _ => None,
        }
    }

    /// Requester for request events
    pub fn requester(&self) -> Option<Uid> {
        match &self.payload {
            HookPayload::Request { requester, .. } => *requester,
            _ => None,
        }
    }
}
