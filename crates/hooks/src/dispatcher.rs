//! Hook dispatcher
//!
//! One dispatcher per object holds that object's hook stacks, keyed by
//! [`HookId`]. Stacks are created lazily on first registration with the
//! hook's default details.
//!
//! ## Triggering
//!
//! Triggers snapshot the stack's handles under the lock and then run each
//! callback with the lock released, so callbacks may register, remove or
//! trigger further hooks. Callbacks added during a trigger are not run by
//! that trigger.
//!
//! A callback that is already running on the current thread is not entered
//! again: the nested trigger treats it as a failure. This bounds recursion
//! when a callback's own action fires the hook it is attached to.

use crate::callback::{
    AddMode, Callback, CallbackInfo, CallbackRecord, CallbackStatus, HookCallback, HookHandle,
};
use crate::event::{HookEvent, HookPayload};
use nirva_core::{Error, HookDetails, HookId, HookPattern, RequestResponse, Result, Uid};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Retry policy for stacks flagged `COND_RETRY`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first WAIT_RETRY answer
    pub limit: u32,
    /// Pause between retries
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 16,
            interval: Duration::from_millis(1),
        }
    }
}

/// Result of [`HookDispatcher::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Callback was added
    Added(HookHandle),
    /// An existing callback's data key was replaced
    Replaced(HookHandle),
    /// A uniqueness rule refused the callback
    Rejected,
    /// Toggle mode removed an existing callback
    Removed(HookHandle),
}

impl AddOutcome {
    /// Handle of the added or replaced callback
    pub fn handle(&self) -> Option<HookHandle> {
        match self {
            AddOutcome::Added(h) | AddOutcome::Replaced(h) => Some(*h),
            _ => None,
        }
    }
}

struct HookStack {
    details: HookDetails,
    callbacks: Vec<CallbackRecord>,
}

impl HookStack {
    fn new(hook: HookId) -> Self {
        Self {
            details: hook.default_details(),
            callbacks: Vec::new(),
        }
    }

    fn position(&self, handle: HookHandle) -> Option<usize> {
        self.callbacks.iter().position(|r| r.handle == handle)
    }
}

enum Enter {
    Run(HookCallback, String),
    Skip,
    Recursed(String),
}

/// Outcome of running one callback
enum Step<T> {
    Ran(String, T),
    Skipped,
    Recursed(String),
}

/// Clears the running mark when a callback returns or unwinds
struct RunningGuard<'a> {
    dispatcher: &'a HookDispatcher,
    hook: HookId,
    handle: HookHandle,
    passed: bool,
    keep_on_false: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher
            .leave(self.hook, self.handle, self.passed, self.keep_on_false);
    }
}

/// Per-object hook stacks
pub struct HookDispatcher {
    owner: Uid,
    stacks: Mutex<FxHashMap<HookId, HookStack>>,
    next_handle: AtomicU64,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("owner", &self.owner)
            .field("stacks", &self.stacks.lock().len())
            .finish()
    }
}

impl HookDispatcher {
    /// Dispatcher for `owner` with the default retry policy
    pub fn new(owner: Uid) -> Self {
        Self::with_retry(owner, RetryPolicy::default())
    }

    /// Dispatcher with an explicit retry policy
    pub fn with_retry(owner: Uid, retry: RetryPolicy) -> Self {
        Self {
            owner,
            stacks: Mutex::new(FxHashMap::default()),
            next_handle: AtomicU64::new(1),
            retry,
        }
    }

    /// Owning object
    pub fn owner(&self) -> Uid {
        self.owner
    }

    /// Event on this dispatcher's owner
    pub fn event(&self, hook: HookId) -> HookEvent {
        HookEvent::new(hook, self.owner)
    }

    /// Stack details (the hook's defaults until changed)
    pub fn details(&self, hook: HookId) -> HookDetails {
        self.stacks
            .lock()
            .get(&hook)
            .map(|s| s.details)
            .unwrap_or_else(|| hook.default_details())
    }

    /// Replace stack details
    pub fn set_details(&self, hook: HookId, details: HookDetails) {
        let mut stacks = self.stacks.lock();
        stacks
            .entry(hook)
            .or_insert_with(|| HookStack::new(hook))
            .details = details;
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a callback
    ///
    /// # Errors
    ///
    /// `NotOwner` if the stack is self-only and the callback is not
    /// registered by the owner (anonymous callbacks included).
    pub fn add(&self, hook: HookId, cb: Callback) -> Result<AddOutcome> {
        let outcome = {
            let mut stacks = self.stacks.lock();
            let stack = stacks.entry(hook).or_insert_with(|| HookStack::new(hook));

            if stack.details.contains(HookDetails::SELF_ONLY)
                && cb.registrant != Some(self.owner)
            {
                return Err(Error::NotOwner(format!(
                    "{} on {} only accepts callbacks from its owner",
                    hook, self.owner
                )));
            }

            let mode = cb.mode;
            let existing = stack.callbacks.iter().position(|r| r.name == cb.name);

            if mode.contains(AddMode::TOGGLE) && existing.is_some() {
                let handle = existing.map(|i| stack.callbacks[i].handle);
                drop(stacks);
                if let Some(h) = handle {
                    self.remove(hook, h);
                    return Ok(AddOutcome::Removed(h));
                }
                return Ok(AddOutcome::Rejected);
            }

            if mode.contains(AddMode::REPLACE) {
                if let Some(i) = existing {
                    let rec = &mut stack.callbacks[i];
                    rec.data_key = cb.data_key;
                    rec.func = cb.func;
                    return Ok(AddOutcome::Replaced(rec.handle));
                }
            } else if mode.contains(AddMode::UNIQUE_FUNC) && existing.is_some() {
                return Ok(AddOutcome::Rejected);
            } else if mode.contains(AddMode::UNIQUE_DATA)
                && stack
                    .callbacks
                    .iter()
                    .any(|r| r.name == cb.name && r.data_key == cb.data_key)
            {
                return Ok(AddOutcome::Rejected);
            }

            let handle = HookHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            let record = CallbackRecord {
                handle,
                name: cb.name,
                data_key: cb.data_key,
                mode,
                status: CallbackStatus::empty(),
                running: SmallVec::new(),
                func: cb.func,
            };
            trace!(target: "nirva::hooks", owner = %self.owner, hook = %hook, name = %record.name, "callback added");
            let name = record.name.clone();
            if mode.contains(AddMode::PRIORITY) {
                stack.callbacks.insert(0, record);
            } else {
                stack.callbacks.push(record);
            }
            (handle, name)
        };

        if hook != HookId::HOOK_CB_ATTACHED && hook != HookId::HOOK_CB_DETACHING {
            let ev = self.event(HookId::HOOK_CB_ATTACHED).with_payload(HookPayload::Callback {
                hook,
                name: outcome.1,
            });
            self.trigger_spontaneous(&ev);
        }
        Ok(AddOutcome::Added(outcome.0))
    }

    /// Register a callback at the front of the stack
    pub fn prepend(&self, hook: HookId, cb: Callback) -> Result<AddOutcome> {
        let mode = cb.mode | AddMode::PRIORITY;
        self.add(hook, cb.mode(mode))
    }

    /// Remove a callback by handle
    ///
    /// HOOK_CB_DETACHING fires before the callback is removed.
    pub fn remove(&self, hook: HookId, handle: HookHandle) -> bool {
        let name = {
            let stacks = self.stacks.lock();
            match stacks.get(&hook).and_then(|s| {
                s.position(handle).map(|i| s.callbacks[i].name.clone())
            }) {
                Some(n) => n,
                None => return false,
            }
        };
        if hook != HookId::HOOK_CB_ATTACHED && hook != HookId::HOOK_CB_DETACHING {
            let ev = self
                .event(HookId::HOOK_CB_DETACHING)
                .with_payload(HookPayload::Callback { hook, name });
            self.trigger_spontaneous(&ev);
        }
        let mut stacks = self.stacks.lock();
        match stacks.get_mut(&hook) {
            Some(stack) => match stack.position(handle) {
                Some(i) => {
                    stack.callbacks.remove(i);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Remove every callback with this name (and data key, when given)
    pub fn remove_by_name(&self, hook: HookId, name: &str, data_key: Option<&str>) -> usize {
        let handles: Vec<HookHandle> = {
            let stacks = self.stacks.lock();
            stacks
                .get(&hook)
                .map(|s| {
                    s.callbacks
                        .iter()
                        .filter(|r| r.matches(name, data_key))
                        .map(|r| r.handle)
                        .collect()
                })
                .unwrap_or_default()
        };
        handles.into_iter().filter(|h| self.remove(hook, *h)).count()
    }

    /// Block or unblock a callback; blocked callbacks are skipped
    pub fn set_blocked(&self, hook: HookId, handle: HookHandle, blocked: bool) -> bool {
        let mut stacks = self.stacks.lock();
        let Some(stack) = stacks.get_mut(&hook) else {
            return false;
        };
        match stack.position(handle) {
            Some(i) => {
                stack.callbacks[i].status.set(CallbackStatus::BLOCKED, blocked);
                true
            }
            None => false,
        }
    }

    /// Remove every callback from one stack
    pub fn clear(&self, hook: HookId) -> usize {
        let mut stacks = self.stacks.lock();
        stacks
            .get_mut(&hook)
            .map(|s| std::mem::take(&mut s.callbacks).len())
            .unwrap_or(0)
    }

    /// Remove every callback from every stack
    pub fn clear_all(&self) {
        self.stacks.lock().clear();
    }

    /// Number of callbacks on a stack
    pub fn callback_count(&self, hook: HookId) -> usize {
        self.stacks
            .lock()
            .get(&hook)
            .map(|s| s.callbacks.len())
            .unwrap_or(0)
    }

    /// Registered callbacks in stack order
    pub fn callbacks(&self, hook: HookId) -> Vec<CallbackInfo> {
        self.stacks
            .lock()
            .get(&hook)
            .map(|s| {
                s.callbacks
                    .iter()
                    .map(|r| CallbackInfo {
                        handle: r.handle,
                        name: r.name.clone(),
                        data_key: r.data_key.clone(),
                        status: r.status,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Triggering
    // ========================================================================

    /// Trigger according to the hook's base pattern
    ///
    /// Returns false if a before-hook vetoed, a request was not granted, or
    /// any callback refused.
    pub fn trigger(&self, ev: &HookEvent) -> bool {
        match ev.hook.pattern() {
            HookPattern::DataBefore => self.trigger_data_before(ev).is_ok(),
            HookPattern::DataAfter => self.trigger_data_after(ev),
            HookPattern::Request => self.trigger_request(ev).is_yes(),
            HookPattern::Spontaneous => self.trigger_spontaneous(ev),
        }
    }

    /// Run a before-hook; the first refusal vetoes the change
    ///
    /// # Errors
    ///
    /// `Vetoed` naming the refusing callback.
    pub fn trigger_data_before(&self, ev: &HookEvent) -> Result<()> {
        for handle in self.snapshot(ev.hook) {
            match self.run_one(ev, handle, false, |f| f.check(ev), |ok| *ok) {
                Step::Ran(_, true) | Step::Skipped => {}
                Step::Ran(name, false) | Step::Recursed(name) => {
                    let strand = ev.strand().unwrap_or_default().to_string();
                    warn!(target: "nirva::hooks", owner = %self.owner, hook = %ev.hook, callback = %name, "change vetoed");
                    return Err(Error::Vetoed {
                        strand,
                        callback: name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Run an after-hook; results are observational
    pub fn trigger_data_after(&self, ev: &HookEvent) -> bool {
        self.run_all(ev)
    }

    /// Run a spontaneous hook
    ///
    /// Stacks flagged `PARALLEL` are dispatched with [`trigger_parallel`].
    ///
    /// [`trigger_parallel`]: HookDispatcher::trigger_parallel
    pub fn trigger_spontaneous(&self, ev: &HookEvent) -> bool {
        if self.details(ev.hook).contains(HookDetails::PARALLEL) {
            return self.trigger_parallel(ev);
        }
        self.run_all(ev)
    }

    fn run_all(&self, ev: &HookEvent) -> bool {
        let mut all_ok = true;
        for handle in self.snapshot(ev.hook) {
            match self.run_one(ev, handle, false, |f| f.check(ev), |ok| *ok) {
                Step::Ran(_, ok) => all_ok &= ok,
                Step::Skipped => {}
                Step::Recursed(_) => all_ok = false,
            }
        }
        all_ok
    }

    /// Run a request hook
    ///
    /// Callbacks are asked in order; the first answer other than YES is the
    /// result. An empty stack grants the request. On `COND_RETRY` stacks a
    /// WAIT_RETRY answer is retried per the dispatcher's retry policy.
    pub fn trigger_request(&self, ev: &HookEvent) -> RequestResponse {
        let retry = self.details(ev.hook).contains(HookDetails::COND_RETRY);
        for handle in self.snapshot(ev.hook) {
            let mut attempts = 0u32;
            let answer = loop {
                match self.run_one(
                    ev,
                    handle,
                    false,
                    |f| f.respond(ev),
                    |r| r.is_yes(),
                ) {
                    Step::Ran(_, RequestResponse::WaitRetry) if retry && attempts < self.retry.limit => {
                        attempts += 1;
                        std::thread::sleep(self.retry.interval);
                    }
                    Step::Ran(_, r) => break Some(r),
                    Step::Skipped if attempts > 0 => break Some(RequestResponse::WaitRetry),
                    Step::Skipped => break None,
                    Step::Recursed(_) => break Some(RequestResponse::No),
                }
            };
            match answer {
                None | Some(RequestResponse::Yes) => {}
                Some(other) => {
                    debug!(target: "nirva::hooks", owner = %self.owner, hook = %ev.hook, answer = ?other, "request not granted");
                    return other;
                }
            }
        }
        RequestResponse::Yes
    }

    /// Evaluate a soft-wait condition set
    ///
    /// Stops at the first callback returning false and keeps it registered,
    /// whatever its mode, so the condition is evaluated again on the next
    /// poll.
    pub fn trigger_sync_wait(&self, ev: &HookEvent) -> bool {
        for handle in self.snapshot(ev.hook) {
            match self.run_one(ev, handle, true, |f| f.check(ev), |ok| *ok) {
                Step::Ran(_, true) | Step::Skipped => {}
                Step::Ran(_, false) | Step::Recursed(_) => return false,
            }
        }
        true
    }

    /// Run every callback concurrently and wait for all of them
    ///
    /// Each callback runs on its own scoped thread. A panicking callback
    /// counts as a refusal.
    pub fn trigger_parallel(&self, ev: &HookEvent) -> bool {
        let mut guards = Vec::new();
        let mut funcs = Vec::new();
        let mut all_ok = true;
        for handle in self.snapshot(ev.hook) {
            match self.enter(ev.hook, handle) {
                Enter::Run(f, _) => {
                    guards.push(RunningGuard {
                        dispatcher: self,
                        hook: ev.hook,
                        handle,
                        passed: true,
                        keep_on_false: false,
                    });
                    funcs.push(f);
                }
                Enter::Skip => {}
                Enter::Recursed(_) => all_ok = false,
            }
        }
        if funcs.is_empty() {
            return all_ok;
        }

        let results: Vec<bool> = std::thread::scope(|s| {
            let handles: Vec<_> = funcs
                .iter()
                .map(|f| s.spawn(move || f.check(ev)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(false))
                .collect()
        });

        for (guard, ok) in guards.iter_mut().zip(&results) {
            guard.passed = *ok;
            all_ok &= *ok;
        }
        all_ok
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn snapshot(&self, hook: HookId) -> SmallVec<[HookHandle; 8]> {
        self.stacks
            .lock()
            .get(&hook)
            .map(|s| s.callbacks.iter().map(|r| r.handle).collect())
            .unwrap_or_default()
    }

    fn enter(&self, hook: HookId, handle: HookHandle) -> Enter {
        let me = std::thread::current().id();
        let mut stacks = self.stacks.lock();
        let Some(rec) = stacks
            .get_mut(&hook)
            .and_then(|s| s.callbacks.iter_mut().find(|r| r.handle == handle))
        else {
            return Enter::Skip;
        };
        if rec.status.contains(CallbackStatus::BLOCKED) {
            return Enter::Skip;
        }
        if rec.running.contains(&me) {
            trace!(target: "nirva::hooks", hook = %hook, name = %rec.name, "recursive trigger refused");
            return Enter::Recursed(rec.name.clone());
        }
        rec.running.push(me);
        Enter::Run(rec.func.clone(), rec.name.clone())
    }

    fn leave(&self, hook: HookId, handle: HookHandle, passed: bool, keep_on_false: bool) {
        let me = std::thread::current().id();
        let mut stacks = self.stacks.lock();
        let Some(stack) = stacks.get_mut(&hook) else {
            return;
        };
        let once = stack.details.contains(HookDetails::COND_ONCE);
        let Some(i) = stack.position(handle) else {
            return;
        };
        let rec = &mut stack.callbacks[i];
        if let Some(pos) = rec.running.iter().position(|t| *t == me) {
            rec.running.swap_remove(pos);
        }
        rec.status.insert(CallbackStatus::ACTIONED);
        let remove = rec.running.is_empty()
            && (once
                || rec.mode.contains(AddMode::ONE_SHOT)
                || (!passed && !keep_on_false && rec.mode.contains(AddMode::REMOVE_ON_FALSE)));
        if remove {
            trace!(target: "nirva::hooks", hook = %hook, name = %rec.name, "callback removed after run");
            stack.callbacks.remove(i);
        }
    }

    fn run_one<T>(
        &self,
        ev: &HookEvent,
        handle: HookHandle,
        keep_on_false: bool,
        call: impl FnOnce(&HookCallback) -> T,
        passed: impl FnOnce(&T) -> bool,
    ) -> Step<T> {
        let (func, name) = match self.enter(ev.hook, handle) {
            Enter::Run(f, n) => (f, n),
            Enter::Skip => return Step::Skipped,
            Enter::Recursed(n) => return Step::Recursed(n),
        };
        let mut guard = RunningGuard {
            dispatcher: self,
            hook: ev.hook,
            handle,
            passed: false,
            keep_on_false,
        };
        trace!(target: "nirva::hooks", owner = %self.owner, hook = %ev.hook, callback = %name, "dispatch");
        let out = call(&func);
        guard.passed = passed(&out);
        drop(guard);
        Step::Ran(name, out)
    }
}
