//! Proc thread state bits and transition rules
//!
//! A proc thread's state is a 64-bit mask split into groups:
//! - lifecycle position: UNQUEUED, QUEUED, PREPARING, RUNNING, then
//!   COMPLETED or IDLING, then DESTROYING and DESTROYED
//! - outcomes: COMPLETED, CANCELLED, ERROR, TIMED_OUT, SIGNALLED, INVALID
//!   (at most one, never replaced)
//! - FINISHED, set once every finishing hook has run
//! - transient bits: BUSY, WAITING, BLOCKED, PAUSED plus the pre-outcome
//!   positions
//! - options (NOTIFY, CANCELLABLE, DONTCARE, PAUSABLE) and request bits
//!
//! Positions never move backwards, except IDLING back to QUEUED when an idle
//! function is resubmitted.

use crate::error::{ThreadError, ThreadResult};

nirva_core::flag_set! {
    /// Proc thread state mask
    pub struct ThreadState: u64 {
        const FINISHED = 1 << 0;
        const CANCELLED = 1 << 1;
        /// The body panicked
        const SIGNALLED = 1 << 2;
        const BUSY = 1 << 3;
        const ERROR = 1 << 4;
        /// Waited past the soft threshold
        const BLOCKED = 1 << 5;
        const TIMED_OUT = 1 << 6;
        const PAUSED = 1 << 7;
        /// Idle function at rest; may be resubmitted
        const IDLING = 1 << 8;
        const WAITING = 1 << 9;

        const UNQUEUED = 1 << 12;
        const QUEUED = 1 << 13;
        const PREPARING = 1 << 14;
        const RUNNING = 1 << 16;
        const COMPLETED = 1 << 17;
        const DESTROYING = 1 << 18;
        const DESTROYED = 1 << 19;
        /// Bad argument format or arguments
        const INVALID = 1u64 << 31;

        const NOTIFY = 1u64 << 32;
        const CANCELLABLE = 1u64 << 34;
        /// Nobody will collect the result
        const DONTCARE = 1u64 << 35;
        const PAUSABLE = 1u64 << 36;

        const PAUSE_REQUESTED = 1u64 << 40;
        const RESUME_REQUESTED = 1u64 << 41;
        const CANCEL_REQUESTED = 1u64 << 42;
    }
}

nirva_core::flag_set! {
    /// Creation attributes of a proc thread
    pub struct ThreadAttrs: u64 {
        /// Queue at the consumed end of the pool queue
        const PRIORITY = 1 << 0;
        /// Destroy automatically once finished
        const AUTODELETE = 1 << 1;
        /// `queue` returns only after the body has started
        const WAIT_START = 1 << 2;
        /// Hard-wait for `sync_ready` before running the body
        const WAIT_SYNC = 1 << 3;
        /// Run on the queueing thread instead of the pool
        const FG_THREAD = 1 << 4;
        /// Advisory: the body never touches UI state
        const NO_GUI = 1 << 5;
        /// Lifecycle hooks are forwarded to a parent dispatcher
        const INHERIT_HOOKS = 1 << 6;
        /// `sync_point` is a no-op
        const IGNORE_SYNCPT = 1 << 7;
        /// Never destroyed implicitly, even with AUTODELETE or DONTCARE
        const NOFREE = 1 << 8;
        /// Body is an idle function that may rest in IDLING
        const IDLEFUNC = 1 << 9;
        /// Record the wall-clock start time
        const NOTE_STTIME = 1 << 10;
    }
}

impl ThreadState {
    /// Mutually exclusive outcome bits
    pub const OUTCOMES: ThreadState = ThreadState(
        Self::COMPLETED.0
            | Self::CANCELLED.0
            | Self::ERROR.0
            | Self::TIMED_OUT.0
            | Self::SIGNALLED.0
            | Self::INVALID.0,
    );

    /// Bits that only make sense while the thread is live
    pub const TRANSIENT: ThreadState = ThreadState(
        Self::UNQUEUED.0
            | Self::QUEUED.0
            | Self::PREPARING.0
            | Self::RUNNING.0
            | Self::BUSY.0
            | Self::WAITING.0
            | Self::BLOCKED.0
            | Self::PAUSED.0,
    );

    /// Bits whose inclusion ends the live phase
    pub const FINAL: ThreadState = ThreadState(
        Self::OUTCOMES.0
            | Self::FINISHED.0
            | Self::IDLING.0
            | Self::DESTROYING.0
            | Self::DESTROYED.0,
    );

    const LIVE_POSITIONS: ThreadState =
        ThreadState(Self::QUEUED.0 | Self::PREPARING.0 | Self::RUNNING.0);

    const POSITIONS: [ThreadState; 4] = [
        Self::RUNNING,
        Self::PREPARING,
        Self::QUEUED,
        Self::UNQUEUED,
    ];

    /// Lifecycle rank; never decreases except on IDLING to QUEUED
    pub fn rank(self) -> u8 {
        if self.contains(Self::DESTROYED) {
            7
        } else if self.contains(Self::DESTROYING) {
            6
        } else if self.contains(Self::FINISHED) {
            5
        } else if self.intersects(Self::OUTCOMES | Self::IDLING) {
            4
        } else if self.contains(Self::RUNNING) {
            3
        } else if self.contains(Self::PREPARING) {
            2
        } else if self.contains(Self::QUEUED) {
            1
        } else {
            0
        }
    }

    /// True once the thread will not run its body again without a resubmit
    pub fn is_done(self) -> bool {
        self.intersects(Self::FINISHED | Self::IDLING | Self::DESTROYED)
    }

    /// Subset of `bits` currently set
    pub fn check(self, bits: ThreadState) -> ThreadState {
        self & bits
    }

    fn normalized(mut self) -> Self {
        if self.intersects(Self::FINAL) {
            self.remove(Self::TRANSIENT);
            if self.intersects(Self::OUTCOMES | Self::FINISHED) {
                self.remove(Self::IDLING);
            }
        } else if let Some(top) = Self::POSITIONS.iter().find(|p| self.contains(**p)) {
            // Keep only the most advanced position
            for p in Self::POSITIONS {
                if p != *top {
                    self.remove(p);
                }
            }
        }
        self
    }

    /// Validate and normalise a whole-state transition
    ///
    /// # Errors
    ///
    /// `InvalidState` when the thread is destroyed, when a position would
    /// move backwards, when a second outcome would be added, or when a
    /// transient bit is requested after FINISHED.
    pub fn transition(self, requested: ThreadState) -> ThreadResult<ThreadState> {
        if self.contains(Self::DESTROYED) {
            if requested == self {
                return Ok(self);
            }
            return Err(ThreadError::Destroyed);
        }
        let added = requested & !self;
        if self.contains(Self::FINISHED) && added.intersects(Self::TRANSIENT | Self::IDLING) {
            return Err(ThreadError::InvalidState(format!(
                "finished thread cannot take {:?}",
                added & (Self::TRANSIENT | Self::IDLING)
            )));
        }
        let old_out = self & Self::OUTCOMES;
        let new_out = requested & Self::OUTCOMES;
        if new_out.bits().count_ones() > 1 {
            return Err(ThreadError::InvalidState(format!(
                "outcomes are exclusive, got {:?}",
                new_out
            )));
        }
        if !old_out.is_empty() && new_out != old_out {
            return Err(ThreadError::InvalidState(format!(
                "outcome {:?} cannot change to {:?}",
                old_out, new_out
            )));
        }
        if self.contains(Self::FINISHED) && !requested.contains(Self::FINISHED) {
            return Err(ThreadError::InvalidState("FINISHED cannot be cleared".into()));
        }

        let resubmit = self.contains(Self::IDLING)
            && !self.contains(Self::FINISHED)
            && added.contains(Self::QUEUED);
        let added_positions = added & Self::LIVE_POSITIONS;
        if !added_positions.is_empty() && !resubmit && added_positions.rank() < self.rank() {
            return Err(ThreadError::InvalidState(format!(
                "cannot move back from {:?} to {:?}",
                self, added_positions
            )));
        }
        let mut next = requested;
        if resubmit {
            next.remove(Self::IDLING);
        }
        let next = next.normalized();
        if next.rank() < self.rank() && !resubmit {
            return Err(ThreadError::InvalidState(format!(
                "cannot move back from {:?} to {:?}",
                self, next
            )));
        }
        Ok(next)
    }

    /// Transition that sets `bits`
    pub fn including(self, bits: ThreadState) -> ThreadResult<ThreadState> {
        self.transition(self | bits)
    }

    /// Transition that clears `bits`
    pub fn excluding(self, bits: ThreadState) -> ThreadResult<ThreadState> {
        self.transition(self & !bits)
    }
}
