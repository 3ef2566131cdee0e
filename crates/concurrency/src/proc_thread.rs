//! Proc threads
//!
//! A [`ProcThread`] wraps a body closure in a [`ThreadState`] machine and
//! runs it on a [`ThreadPool`] worker. Callers interact with a running
//! thread only through request bits (cancel, pause, resume) that the body
//! honours at its own checkpoints through the [`ThreadContext`] it receives.
//!
//! Every state edge fires the matching hook on the thread's own
//! [`HookDispatcher`], and on a parent dispatcher when created with
//! `INHERIT_HOOKS`.

use crate::error::{ThreadError, ThreadResult};
use crate::pool::{panic_message, ThreadPool};
use crate::refcount::RefCounter;
use crate::state::{ThreadAttrs, ThreadState};
use crate::token::CancellationToken;
use chrono::{DateTime, Utc};
use nirva_core::{Funcsig, HookId, RequestResponse, StrandValue, Uid};
use nirva_hooks::{HookDispatcher, HookEvent};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// What a body run produced
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// Finished with a return value
    Done(T),
    /// Idle function at rest; the thread may be resubmitted
    Idle,
}

/// Boxed body of a proc thread
pub type ThreadBody<T> = Box<dyn FnMut(&ThreadContext) -> ThreadResult<Step<T>> + Send>;

/// Slot cleared when the thread it holds is destroyed
pub type ThreadSlot<T> = Arc<Mutex<Option<ProcThread<T>>>>;

/// Wait and poll timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadConfig {
    /// Soft-wait time after which the thread reports BLOCKED
    pub blocked_limit: Duration,
    /// Poll period of soft waits and pauses
    pub poll_interval: Duration,
    /// Hard-wait deadline for `WAIT_SYNC` threads; `None` waits forever
    pub sync_timeout: Option<Duration>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            blocked_limit: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
            sync_timeout: None,
        }
    }
}

struct Shared {
    uid: Uid,
    attrs: ThreadAttrs,
    funcsig: Funcsig,
    args: Vec<StrandValue>,
    config: ThreadConfig,
    state: Mutex<ThreadState>,
    state_cond: Condvar,
    sync_ready: Mutex<bool>,
    sync_cond: Condvar,
    token: CancellationToken,
    cancel_observed: AtomicBool,
    hooks: Arc<HookDispatcher>,
    parent_hooks: Option<Arc<HookDispatcher>>,
    started: Mutex<Option<DateTime<Utc>>>,
    finished: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    fn update(
        &self,
        f: impl FnOnce(ThreadState) -> ThreadResult<ThreadState>,
    ) -> ThreadResult<ThreadState> {
        let mut st = self.state.lock();
        let next = f(*st)?;
        if next != *st {
            trace!(target: "nirva::thread", uid = %self.uid, from = ?*st, to = ?next, "state change");
            *st = next;
        }
        self.state_cond.notify_all();
        Ok(next)
    }

    fn fire(&self, hook: HookId) -> bool {
        let ev = HookEvent::new(hook, self.uid);
        let mut ok = self.hooks.trigger_spontaneous(&ev);
        if let Some(parent) = &self.parent_hooks {
            ok &= parent.trigger_spontaneous(&ev);
        }
        ok
    }

    fn ask(&self, hook: HookId) -> RequestResponse {
        let ev = HookEvent::new(hook, self.uid);
        let answer = self.hooks.trigger_request(&ev);
        match &self.parent_hooks {
            Some(parent) if answer.is_yes() => parent.trigger_request(&ev),
            _ => answer,
        }
    }
}

/// Handle given to a running body
///
/// Cancellation and pause requests only take effect where the body calls
/// [`check_cancelled`](ThreadContext::check_cancelled),
/// [`sync_point`](ThreadContext::sync_point) or
/// [`wait_loop`](ThreadContext::wait_loop).
#[derive(Clone)]
pub struct ThreadContext {
    shared: Arc<Shared>,
}

impl ThreadContext {
    /// Uid of the proc thread
    pub fn uid(&self) -> Uid {
        self.shared.uid
    }

    /// Arguments supplied at creation
    pub fn args(&self) -> &[StrandValue] {
        &self.shared.args
    }

    /// Signature of the arguments
    pub fn funcsig(&self) -> Funcsig {
        self.shared.funcsig
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    /// The thread's hook dispatcher
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.shared.hooks
    }

    /// The thread's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Honour pending requests
    ///
    /// Blocks while a pause is in effect, then reports cancellation.
    ///
    /// # Errors
    ///
    /// `Cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> ThreadResult<()> {
        self.handle_pause()?;
        if self.shared.token.is_cancelled() {
            if !self.shared.cancel_observed.swap(true, Ordering::AcqRel) {
                debug!(target: "nirva::thread", uid = %self.shared.uid, "cancellation observed");
            }
            return Err(ThreadError::Cancelled);
        }
        Ok(())
    }

    fn handle_pause(&self) -> ThreadResult<()> {
        let sh = &self.shared;
        if !sh.state().contains(ThreadState::PAUSE_REQUESTED) || sh.token.is_cancelled() {
            return Ok(());
        }
        sh.update(|s| s.transition((s | ThreadState::PAUSED) & !ThreadState::PAUSE_REQUESTED))?;
        debug!(target: "nirva::thread", uid = %sh.uid, "paused");
        sh.fire(HookId::PAUSED);
        {
            let mut st = sh.state.lock();
            while !st.contains(ThreadState::RESUME_REQUESTED) && !sh.token.is_cancelled() {
                sh.state_cond.wait_for(&mut st, sh.config.poll_interval);
            }
        }
        sh.update(|s| s.excluding(ThreadState::PAUSED | ThreadState::RESUME_REQUESTED))?;
        if !sh.token.is_cancelled() {
            debug!(target: "nirva::thread", uid = %sh.uid, "resuming");
            sh.fire(HookId::RESUMING);
        }
        Ok(())
    }

    /// Synchronisation checkpoint
    ///
    /// Announces the checkpoint on SYNC_ANNOUNCE, then behaves like
    /// `check_cancelled`. A no-op for `IGNORE_SYNCPT` threads.
    pub fn sync_point(&self) -> ThreadResult<()> {
        if self.shared.attrs.contains(ThreadAttrs::IGNORE_SYNCPT) {
            return Ok(());
        }
        self.shared.fire(HookId::SYNC_ANNOUNCE);
        self.check_cancelled()
    }

    /// Soft wait on the SYNC_WAIT condition set
    ///
    /// Polls the thread's SYNC_WAIT callbacks until all return true. The
    /// thread stays responsive to pause and cancellation while waiting and
    /// reports BLOCKED once the wait exceeds the configured blocked limit.
    ///
    /// # Errors
    ///
    /// `Cancelled` on cancellation, `TimedOut` once `timeout` elapses.
    pub fn wait_loop(&self, timeout: Option<Duration>) -> ThreadResult<()> {
        let sh = &self.shared;
        let start = Instant::now();
        sh.update(|s| s.including(ThreadState::WAITING))?;
        sh.fire(HookId::TX_WAITING);

        let ev = HookEvent::new(HookId::SYNC_WAIT, sh.uid);
        let mut blocked = false;
        let result = loop {
            if let Err(e) = self.check_cancelled() {
                break Err(e);
            }
            if sh.hooks.trigger_sync_wait(&ev) {
                break Ok(());
            }
            let waited = start.elapsed();
            if let Some(limit) = timeout {
                if waited >= limit {
                    warn!(target: "nirva::thread", uid = %sh.uid, waited_ms = waited.as_millis() as u64, "soft wait timed out");
                    break Err(ThreadError::TimedOut(limit.as_millis() as u64));
                }
            }
            if !blocked && waited >= sh.config.blocked_limit {
                blocked = self.set_blocked(true);
            }
            std::thread::sleep(sh.config.poll_interval);
        };

        if blocked {
            self.set_blocked(false);
        }
        let _ = sh.update(|s| s.excluding(ThreadState::WAITING));
        result
    }

    /// Set or clear the BLOCKED bit; TX_BLOCKED fires when it is set
    pub fn set_blocked(&self, blocked: bool) -> bool {
        let sh = &self.shared;
        if blocked {
            if sh.update(|s| s.including(ThreadState::BLOCKED)).is_err() {
                return false;
            }
            warn!(target: "nirva::thread", uid = %sh.uid, "blocked");
            sh.fire(HookId::TX_BLOCKED);
            true
        } else {
            sh.update(|s| s.excluding(ThreadState::BLOCKED)).is_ok()
        }
    }

    fn hard_wait(&self) -> ThreadResult<()> {
        let sh = &self.shared;
        sh.update(|s| s.including(ThreadState::WAITING))?;
        let start = Instant::now();
        let result = {
            let mut ready = sh.sync_ready.lock();
            loop {
                if *ready {
                    break Ok(());
                }
                if sh.token.is_cancelled() {
                    sh.cancel_observed.store(true, Ordering::Release);
                    break Err(ThreadError::Cancelled);
                }
                if let Some(limit) = sh.config.sync_timeout {
                    if start.elapsed() >= limit {
                        warn!(target: "nirva::thread", uid = %sh.uid, "sync wait timed out");
                        break Err(ThreadError::TimedOut(limit.as_millis() as u64));
                    }
                }
                sh.sync_cond.wait_for(&mut ready, sh.config.poll_interval);
            }
        };
        let _ = sh.update(|s| s.excluding(ThreadState::WAITING));
        result
    }
}

struct Inner<T> {
    shared: Arc<Shared>,
    body: Mutex<Option<ThreadBody<T>>>,
    result: Mutex<Option<ThreadResult<T>>>,
    refs: RefCounter,
    destroyed: AtomicBool,
    slots: Mutex<Vec<Weak<Mutex<Option<ProcThread<T>>>>>>,
}

/// A unit of work with an observable lifecycle
pub struct ProcThread<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ProcThread<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ProcThread<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcThread")
            .field("uid", &self.inner.shared.uid)
            .field("state", &self.inner.shared.state())
            .finish()
    }
}

/// Builder for [`ProcThread`]
pub struct ProcThreadBuilder<T> {
    attrs: ThreadAttrs,
    config: ThreadConfig,
    args_fmt: Option<String>,
    args: Vec<StrandValue>,
    parent_hooks: Option<Arc<HookDispatcher>>,
    cancellable: bool,
    pausable: bool,
    body: Option<ThreadBody<T>>,
}

impl<T: Send + 'static> Default for ProcThreadBuilder<T> {
    fn default() -> Self {
        Self {
            attrs: ThreadAttrs::empty(),
            config: ThreadConfig::default(),
            args_fmt: None,
            args: Vec::new(),
            parent_hooks: None,
            cancellable: true,
            pausable: false,
            body: None,
        }
    }
}

impl<T: Send + 'static> ProcThreadBuilder<T> {
    /// Creation attributes
    pub fn attrs(mut self, attrs: ThreadAttrs) -> Self {
        self.attrs |= attrs;
        self
    }

    /// Wait and poll timings
    pub fn config(mut self, config: ThreadConfig) -> Self {
        self.config = config;
        self
    }

    /// Typed arguments, checked against `args_fmt` when built
    pub fn args(mut self, args_fmt: impl Into<String>, args: Vec<StrandValue>) -> Self {
        self.args_fmt = Some(args_fmt.into());
        self.args = args;
        self
    }

    /// Forward lifecycle hooks and requests to `parent`
    pub fn inherit_hooks(mut self, parent: Arc<HookDispatcher>) -> Self {
        self.attrs |= ThreadAttrs::INHERIT_HOOKS;
        self.parent_hooks = Some(parent);
        self
    }

    /// Whether `request_cancel` is honoured (default true)
    pub fn cancellable(mut self, yes: bool) -> Self {
        self.cancellable = yes;
        self
    }

    /// Whether `request_pause` is honoured (default false)
    pub fn pausable(mut self, yes: bool) -> Self {
        self.pausable = yes;
        self
    }

    /// Body run once per queueing
    pub fn body<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&ThreadContext) -> ThreadResult<T> + Send + 'static,
    {
        self.body = Some(Box::new(move |ctx| f(ctx).map(Step::Done)));
        self
    }

    /// Idle function body; returning [`Step::Idle`] parks the thread in IDLING
    pub fn idle_body<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ThreadContext) -> ThreadResult<Step<T>> + Send + 'static,
    {
        self.attrs |= ThreadAttrs::IDLEFUNC;
        self.body = Some(Box::new(f));
        self
    }

    /// Build the thread in UNQUEUED, or INVALID if the arguments are bad
    pub fn build(self) -> ProcThread<T> {
        let uid = Uid::new();
        let mut invalid = None;

        let funcsig = match &self.args_fmt {
            None => Funcsig::VOID,
            Some(fmt) => match Funcsig::from_args_fmt(fmt) {
                Ok(sig) => sig,
                Err(e) => {
                    invalid = Some(ThreadError::from(e));
                    Funcsig::VOID
                }
            },
        };
        if invalid.is_none() {
            if let Err(e) = funcsig.check_args(&self.args) {
                invalid = Some(ThreadError::from(e));
            }
        }
        if invalid.is_none() && self.body.is_none() {
            invalid = Some(ThreadError::InvalidArgs("no body".into()));
        }

        let mut state = ThreadState::UNQUEUED;
        state.set(ThreadState::CANCELLABLE, self.cancellable);
        state.set(ThreadState::PAUSABLE, self.pausable);
        if invalid.is_some() {
            state = (state & !ThreadState::UNQUEUED) | ThreadState::INVALID | ThreadState::FINISHED;
        }

        let hooks = Arc::new(HookDispatcher::new(uid));
        let thread = ProcThread {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    uid,
                    attrs: self.attrs,
                    funcsig,
                    args: self.args,
                    config: self.config,
                    state: Mutex::new(state),
                    state_cond: Condvar::new(),
                    sync_ready: Mutex::new(false),
                    sync_cond: Condvar::new(),
                    token: CancellationToken::new(),
                    cancel_observed: AtomicBool::new(false),
                    hooks,
                    parent_hooks: self.parent_hooks,
                    started: Mutex::new(None),
                    finished: Mutex::new(None),
                }),
                body: Mutex::new(self.body),
                result: Mutex::new(None),
                refs: RefCounter::new(),
                destroyed: AtomicBool::new(false),
                slots: Mutex::new(Vec::new()),
            }),
        };
        match invalid {
            Some(e) => {
                warn!(target: "nirva::thread", uid = %uid, error = %e, "proc thread created invalid");
                *thread.inner.result.lock() = Some(Err(e));
            }
            None => {
                debug!(target: "nirva::thread", uid = %uid, attrs = ?self.attrs, "proc thread created");
            }
        }
        thread
    }
}

impl<T: Send + 'static> ProcThread<T> {
    /// Start building a proc thread
    pub fn builder() -> ProcThreadBuilder<T> {
        ProcThreadBuilder::default()
    }

    /// Thread running `body` with no arguments
    pub fn create<F>(attrs: ThreadAttrs, body: F) -> Self
    where
        F: FnMut(&ThreadContext) -> ThreadResult<T> + Send + 'static,
    {
        Self::builder().attrs(attrs).body(body).build()
    }

    /// Thread running `body` with typed arguments
    ///
    /// A bad `args_fmt`, or arguments that do not match it, leave the thread
    /// INVALID; queueing it then fails with `InvalidArgs`.
    pub fn with_args<F>(attrs: ThreadAttrs, args_fmt: &str, args: Vec<StrandValue>, body: F) -> Self
    where
        F: FnMut(&ThreadContext) -> ThreadResult<T> + Send + 'static,
    {
        Self::builder()
            .attrs(attrs)
            .args(args_fmt, args)
            .body(body)
            .build()
    }

    /// Uid of the thread
    pub fn uid(&self) -> Uid {
        self.inner.shared.uid
    }

    /// Creation attributes
    pub fn attrs(&self) -> ThreadAttrs {
        self.inner.shared.attrs
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.inner.shared.state()
    }

    /// Subset of `bits` currently set
    pub fn check_states(&self, bits: ThreadState) -> ThreadState {
        self.state().check(bits)
    }

    /// Set option bits (NOTIFY, CANCELLABLE, PAUSABLE, DONTCARE)
    ///
    /// # Errors
    ///
    /// Any transition the state machine refuses.
    pub fn include_states(&self, bits: ThreadState) -> ThreadResult<ThreadState> {
        self.inner.shared.update(|s| s.including(bits))
    }

    /// Clear state bits
    pub fn exclude_states(&self, bits: ThreadState) -> ThreadResult<ThreadState> {
        self.inner.shared.update(|s| s.excluding(bits))
    }

    /// Replace the whole state mask, subject to the transition rules
    pub fn set_state(&self, state: ThreadState) -> ThreadResult<ThreadState> {
        self.inner.shared.update(|s| s.transition(state))
    }

    /// The thread's hook dispatcher
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.inner.shared.hooks
    }

    /// The thread's cancellation token
    pub fn token(&self) -> CancellationToken {
        self.inner.shared.token.clone()
    }

    /// Wall-clock start time, recorded for `NOTE_STTIME` threads
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.shared.started.lock()
    }

    /// Wall-clock time the thread finished
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.shared.finished.lock()
    }

    /// Hand the thread to `pool`
    ///
    /// `FG_THREAD` threads run immediately on the calling thread. With
    /// `WAIT_START` the call returns once the body has started.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` for an INVALID thread, `InvalidState` if the thread was
    /// already queued, and any pool submission error.
    pub fn queue(&self, pool: &ThreadPool) -> ThreadResult<()> {
        let state = self.state();
        if state.contains(ThreadState::INVALID) {
            return Err(self.stored_error().unwrap_or(ThreadError::InvalidArgs("invalid".into())));
        }
        if !state.contains(ThreadState::UNQUEUED) {
            return Err(ThreadError::InvalidState(format!("cannot queue from {:?}", state)));
        }
        self.submit(pool)
    }

    /// Queue an IDLING idle function again
    pub fn resubmit(&self, pool: &ThreadPool) -> ThreadResult<()> {
        let state = self.state();
        if !state.contains(ThreadState::IDLING) || state.contains(ThreadState::FINISHED) {
            return Err(ThreadError::InvalidState(format!("cannot resubmit from {:?}", state)));
        }
        self.submit(pool)
    }

    fn submit(&self, pool: &ThreadPool) -> ThreadResult<()> {
        let sh = &self.inner.shared;
        sh.update(|s| s.including(ThreadState::QUEUED))?;
        debug!(target: "nirva::thread", uid = %sh.uid, "queued");

        if sh.attrs.contains(ThreadAttrs::FG_THREAD) {
            self.run();
            return Ok(());
        }

        let me = self.clone();
        let submitted = if sh.attrs.contains(ThreadAttrs::PRIORITY) {
            pool.submit_priority(move || me.run())
        } else {
            pool.submit(move || me.run())
        };
        if let Err(e) = submitted {
            warn!(target: "nirva::thread", uid = %sh.uid, error = %e, "pool refused proc thread");
            self.finish(Err(e.clone()));
            return Err(e);
        }

        if sh.attrs.contains(ThreadAttrs::WAIT_START) {
            let mut st = sh.state.lock();
            while st.rank() < ThreadState::RUNNING.rank() {
                sh.state_cond.wait(&mut st);
            }
        }
        Ok(())
    }

    fn run(&self) {
        let sh = &self.inner.shared;
        let ctx = ThreadContext {
            shared: Arc::clone(sh),
        };
        if sh.token.is_cancelled() {
            sh.cancel_observed.store(true, Ordering::Release);
            self.finish(Err(ThreadError::Cancelled));
            return;
        }
        if let Err(e) = sh.update(|s| s.including(ThreadState::PREPARING)) {
            warn!(target: "nirva::thread", uid = %sh.uid, error = %e, "cannot prepare");
            self.finish(Err(e));
            return;
        }
        sh.fire(HookId::PREPARING);

        if sh.attrs.contains(ThreadAttrs::WAIT_SYNC) {
            if let Err(e) = ctx.hard_wait() {
                self.finish(Err(e));
                return;
            }
        }

        if let Err(e) = sh.update(|s| s.including(ThreadState::RUNNING | ThreadState::BUSY)) {
            warn!(target: "nirva::thread", uid = %sh.uid, error = %e, "cannot start");
            self.finish(Err(e));
            return;
        }
        if sh.attrs.contains(ThreadAttrs::NOTE_STTIME) {
            *sh.started.lock() = Some(Utc::now());
        }
        debug!(target: "nirva::thread", uid = %sh.uid, "running");
        sh.fire(HookId::TX_START);

        let body = self.inner.body.lock().take();
        let Some(mut body) = body else {
            self.finish(Err(ThreadError::InvalidState("body already running".into())));
            return;
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&ctx)));
        *self.inner.body.lock() = Some(body);

        let outcome = match outcome {
            Ok(r) => r,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(target: "nirva::thread", uid = %sh.uid, "proc thread panicked: {}", msg);
                Err(ThreadError::Signalled(msg))
            }
        };
        self.finish(outcome);
    }

    fn finish(&self, outcome: ThreadResult<Step<T>>) {
        let sh = &self.inner.shared;
        if sh.state().intersects(ThreadState::FINISHED | ThreadState::DESTROYED) {
            return;
        }
        let outcome = match outcome {
            Ok(_) if sh.cancel_observed.load(Ordering::Acquire) => Err(ThreadError::Cancelled),
            Ok(Step::Idle) if !sh.attrs.contains(ThreadAttrs::IDLEFUNC) => Err(
                ThreadError::InvalidState("idle step from a thread without IDLEFUNC".into()),
            ),
            o => o,
        };

        match outcome {
            Ok(Step::Idle) => {
                if sh.state().including(ThreadState::IDLING).is_ok() {
                    sh.fire(HookId::IDLE);
                    if sh.update(|s| s.including(ThreadState::IDLING)).is_ok() {
                        debug!(target: "nirva::thread", uid = %sh.uid, "idling");
                    }
                }
                self.maybe_destroy();
                return;
            }
            Ok(Step::Done(value)) => {
                *self.inner.result.lock() = Some(Ok(value));
                if sh.update(|s| s.including(ThreadState::COMPLETED)).is_ok() {
                    debug!(target: "nirva::thread", uid = %sh.uid, "completed");
                    sh.fire(HookId::COMPLETED);
                }
            }
            Err(e) => {
                let (bit, hook) = match &e {
                    ThreadError::Cancelled => (ThreadState::CANCELLED, HookId::CANCELLED),
                    ThreadError::TimedOut(_) => (ThreadState::TIMED_OUT, HookId::TIMED_OUT),
                    ThreadError::Signalled(_) => (ThreadState::SIGNALLED, HookId::ERROR),
                    ThreadError::InvalidArgs(_) => (ThreadState::INVALID, HookId::ERROR),
                    _ => (ThreadState::ERROR, HookId::ERROR),
                };
                match &e {
                    ThreadError::Cancelled => {
                        debug!(target: "nirva::thread", uid = %sh.uid, "cancelled")
                    }
                    other => {
                        warn!(target: "nirva::thread", uid = %sh.uid, error = %other, "proc thread failed")
                    }
                }
                *self.inner.result.lock() = Some(Err(e));
                if sh.update(|s| s.including(bit)).is_ok() {
                    sh.fire(hook);
                }
            }
        }

        *sh.finished.lock() = Some(Utc::now());
        // Waiters wake on FINISHED, so every finishing hook runs first
        if sh.state().including(ThreadState::FINISHED).is_ok() {
            sh.fire(HookId::FINISHED);
            sh.fire(HookId::THREAD_EXIT);
            let _ = sh.update(|s| s.including(ThreadState::FINISHED));
        } else {
            sh.fire(HookId::THREAD_EXIT);
        }

        let state = sh.state();
        if (sh.attrs.contains(ThreadAttrs::AUTODELETE) || state.contains(ThreadState::DONTCARE))
            && !sh.attrs.contains(ThreadAttrs::NOFREE)
        {
            self.inner.refs.make_zombie();
        }
        self.maybe_destroy();
    }

    fn maybe_destroy(&self) {
        if !self.inner.refs.is_zombie() {
            return;
        }
        let state = self.state();
        if !state.intersects(ThreadState::FINISHED | ThreadState::UNQUEUED | ThreadState::IDLING) {
            return;
        }
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sh = &self.inner.shared;
        let _ = sh.update(|s| s.including(ThreadState::DESTROYING));
        sh.fire(HookId::DESTRUCTION);
        for slot in self.inner.slots.lock().drain(..) {
            if let Some(slot) = slot.upgrade() {
                *slot.lock() = None;
            }
        }
        self.inner.body.lock().take();
        let _ = sh.update(|s| s.including(ThreadState::DESTROYED));
        debug!(target: "nirva::thread", uid = %sh.uid, "destroyed");
    }

    fn stored_error(&self) -> Option<ThreadError> {
        match &*self.inner.result.lock() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Release the go signal for a `WAIT_SYNC` thread
    pub fn sync_ready(&self) {
        let sh = &self.inner.shared;
        *sh.sync_ready.lock() = true;
        sh.sync_cond.notify_all();
    }

    /// Ask the thread to cancel
    ///
    /// Only sets the request; the body stops at its next checkpoint. Returns
    /// false when the thread is not cancellable, is already finished, or a
    /// CANCEL_REQUEST callback refused. An IDLING thread is cancelled at once.
    pub fn request_cancel(&self) -> bool {
        let sh = &self.inner.shared;
        let state = sh.state();
        if state.contains(ThreadState::FINISHED) || state.contains(ThreadState::DESTROYED) {
            return false;
        }
        if !state.contains(ThreadState::CANCELLABLE) {
            return false;
        }
        if !sh.ask(HookId::CANCEL_REQUEST).is_yes() {
            debug!(target: "nirva::thread", uid = %sh.uid, "cancel request refused");
            return false;
        }
        if sh.update(|s| s.including(ThreadState::CANCEL_REQUESTED)).is_err() {
            return false;
        }
        sh.token.cancel();
        {
            let _ready = sh.sync_ready.lock();
            sh.sync_cond.notify_all();
        }
        debug!(target: "nirva::thread", uid = %sh.uid, "cancel requested");
        if state.contains(ThreadState::IDLING) {
            sh.cancel_observed.store(true, Ordering::Release);
            self.finish(Err(ThreadError::Cancelled));
        }
        true
    }

    /// Ask a PAUSABLE thread to pause at its next checkpoint
    pub fn request_pause(&self) -> bool {
        let sh = &self.inner.shared;
        let state = sh.state();
        if !state.contains(ThreadState::PAUSABLE) || state.is_done() {
            return false;
        }
        if !sh.ask(HookId::PAUSE_REQUEST).is_yes() {
            return false;
        }
        sh.update(|s| {
            s.transition((s | ThreadState::PAUSE_REQUESTED) & !ThreadState::RESUME_REQUESTED)
        })
        .is_ok()
    }

    /// Ask a paused (or pause-requested) thread to resume
    pub fn request_resume(&self) -> bool {
        let sh = &self.inner.shared;
        let state = sh.state();
        if !state.intersects(ThreadState::PAUSED | ThreadState::PAUSE_REQUESTED) {
            return false;
        }
        if !sh.ask(HookId::RESUME_REQUEST).is_yes() {
            return false;
        }
        sh.update(|s| {
            if s.contains(ThreadState::PAUSED) {
                s.transition((s | ThreadState::RESUME_REQUESTED) & !ThreadState::PAUSE_REQUESTED)
            } else {
                s.excluding(ThreadState::PAUSE_REQUESTED)
            }
        })
        .is_ok()
    }

    /// Block until the thread finishes; returns its result
    ///
    /// # Errors
    ///
    /// The body's error, `InvalidState` for a thread that was never queued or
    /// is idling, and `Destroyed` after destruction.
    pub fn join(&self) -> ThreadResult<T>
    where
        T: Clone,
    {
        let sh = &self.inner.shared;
        {
            let mut st = sh.state.lock();
            loop {
                if st.contains(ThreadState::DESTROYED) {
                    return Err(ThreadError::Destroyed);
                }
                if st.contains(ThreadState::FINISHED) {
                    break;
                }
                if st.contains(ThreadState::UNQUEUED) {
                    return Err(ThreadError::InvalidState("not queued".into()));
                }
                if st.contains(ThreadState::IDLING) {
                    return Err(ThreadError::InvalidState("idling".into()));
                }
                sh.state_cond.wait(&mut st);
            }
        }
        self.inner
            .result
            .lock()
            .clone()
            .unwrap_or(Err(ThreadError::Destroyed))
    }

    /// Wait until the thread is finished, idling or destroyed
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_done(&self, timeout: Option<Duration>) -> bool {
        let sh = &self.inner.shared;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = sh.state.lock();
        while !st.is_done() {
            match deadline {
                Some(d) => {
                    if sh.state_cond.wait_until(&mut st, d).timed_out() {
                        return st.is_done();
                    }
                }
                None => sh.state_cond.wait(&mut st),
            }
        }
        true
    }

    /// Stop tracking the result; the thread is destroyed once finished
    ///
    /// Returns false if the thread had already finished, in which case it is
    /// destroyed now (unless `NOFREE`).
    pub fn dontcare(&self) -> bool {
        let sh = &self.inner.shared;
        let Ok(state) = sh.update(|s| s.including(ThreadState::DONTCARE)) else {
            return false;
        };
        if state.contains(ThreadState::FINISHED) {
            if !sh.attrs.contains(ThreadAttrs::NOFREE) {
                self.inner.refs.make_zombie();
                self.maybe_destroy();
            }
            return false;
        }
        true
    }

    /// Clear `slot` when this thread is destroyed
    pub fn nullify_on_destroy(&self, slot: &ThreadSlot<T>) {
        if self.inner.destroyed.load(Ordering::Acquire) {
            *slot.lock() = None;
            return;
        }
        self.inner.slots.lock().push(Arc::downgrade(slot));
    }

    /// Add a reference; false once the thread is being destroyed
    pub fn add_ref(&self) -> bool {
        self.inner.refs.add_ref().is_some()
    }

    /// Drop a reference
    ///
    /// The count starts at zero; dropping below zero destroys the thread as
    /// soon as it is not running. Returns true on that transition.
    pub fn unref(&self) -> bool {
        let edge = self.inner.refs.unref();
        if edge {
            self.maybe_destroy();
        }
        edge
    }

    /// True once destruction has started
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}
