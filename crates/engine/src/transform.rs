//! Transforms
//!
//! A [`Transform`] is one in-flight actioning of a [`Contract`]. It is
//! created in CONFIGURING by [`Contract::action`], takes its inputs, and is
//! then prepared and run:
//!
//! 1. the chosen capacities are validated
//! 2. declared inputs and outputs become attributes; a missing mandatory
//!    input breaches the contract
//! 3. the contract's cascade picks a trajectory, whose remaining required
//!    inputs are checked the same way
//! 4. on a pool thread, pure inputs are locked read-only and the segments
//!    are walked, honouring cancel and pause requests at segment boundaries
//!    and before each functional
//! 5. the final status and `TX_RESULT` are stored
//!
//! A breach tears down every attribute already created and leaves the
//! transform in ERROR without running any segment.

use crate::attribute::{AttrGroup, Attribute};
use crate::condition::CondContext;
use crate::contract::Contract;
use crate::error::{TxError, TxOutcome};
use crate::marshal::{size_from_return, ArraySize, Blob, NativeCall};
use crate::runtime::Runtime;
use crate::trajectory::{Functional, FunctionalKind, Segment, Trajectory};
use chrono::{DateTime, Utc};
use nirva_concurrency::{ProcThread, ThreadAttrs, ThreadContext, ThreadError, ThreadState};
use nirva_core::{
    AttrFlags, CapSet, ConnFlags, HookId, MapFlags, StrandType, StrandValue, TxFlags, TxResult,
    TxStatus, Uid,
};
use nirva_hooks::{HookDispatcher, HookEvent, HookPayload};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
enum Supply {
    Values(Vec<StrandValue>),
    Connect(Arc<Attribute>, ConnFlags),
}

/// One actioning of a contract
pub struct Transform {
    uid: Uid,
    contract: Arc<Contract>,
    caps: CapSet,
    status: Mutex<TxStatus>,
    result: Mutex<TxResult>,
    error: Mutex<Option<String>>,
    attrs: AttrGroup,
    supplied: Mutex<Vec<(String, Supply)>>,
    trajectory: Mutex<Option<Arc<Trajectory>>>,
    thread: Mutex<Option<ProcThread<TxResult>>>,
    locked: Mutex<Vec<Arc<Attribute>>>,
    hooks: Arc<HookDispatcher>,
    segments_run: AtomicUsize,
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("uid", &self.uid)
            .field("contract", &self.contract.name())
            .field("status", &self.status())
            .field("result", &self.result())
            .field("attrs", &self.attrs.names())
            .finish()
    }
}

impl Transform {
    pub(crate) fn new(contract: Arc<Contract>, caps: CapSet) -> Arc<Self> {
        let uid = Uid::new();
        debug!(target: "nirva::tx", uid = %uid, contract = %contract.name(), "transform created");
        Arc::new(Self {
            uid,
            contract,
            caps,
            status: Mutex::new(TxStatus::Configuring),
            result: Mutex::new(TxResult::None),
            error: Mutex::new(None),
            attrs: AttrGroup::new(uid),
            supplied: Mutex::new(Vec::new()),
            trajectory: Mutex::new(None),
            thread: Mutex::new(None),
            locked: Mutex::new(Vec::new()),
            hooks: Arc::new(HookDispatcher::new(uid)),
            segments_run: AtomicUsize::new(0),
        })
    }

    /// Unique id
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Contract being actioned
    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    /// Chosen capacities
    pub fn caps(&self) -> &CapSet {
        &self.caps
    }

    /// Attributes of the transform
    pub fn attrs(&self) -> &AttrGroup {
        &self.attrs
    }

    /// Lifecycle hooks
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    /// Trajectory chosen when prepared
    pub fn trajectory(&self) -> Option<Arc<Trajectory>> {
        self.trajectory.lock().clone()
    }

    /// Number of segments that have run
    pub fn segments_run(&self) -> usize {
        self.segments_run.load(Ordering::Acquire)
    }

    /// Current status
    ///
    /// While running, a paused, waiting or blocked thread shows through.
    pub fn status(&self) -> TxStatus {
        let status = *self.status.lock();
        if status != TxStatus::Running {
            return status;
        }
        let Some(state) = self.thread.lock().as_ref().map(|t| t.state()) else {
            return status;
        };
        if state.contains(ThreadState::PAUSED) {
            TxStatus::Paused
        } else if state.contains(ThreadState::BLOCKED) {
            TxStatus::Blocked
        } else if state.contains(ThreadState::WAITING) {
            TxStatus::Waiting
        } else {
            status
        }
    }

    /// Stored `TX_RESULT`; `None` until the transform stops
    pub fn result(&self) -> TxResult {
        *self.result.lock()
    }

    /// Text of the error that stopped the transform
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Wall-clock start of the run
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.thread.lock().as_ref().and_then(|t| t.started_at())
    }

    /// Wall-clock end of the run
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.thread.lock().as_ref().and_then(|t| t.finished_at())
    }

    fn set_status(&self, next: TxStatus) {
        let old = std::mem::replace(&mut *self.status.lock(), next);
        if old != next {
            debug!(target: "nirva::tx", uid = %self.uid, from = ?old, to = ?next, "status");
        }
    }

    fn fire(&self, hook: HookId, payload: HookPayload) {
        self.hooks
            .trigger_spontaneous(&HookEvent::new(hook, self.uid).with_payload(payload));
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    fn supply(&self, name: &str, s: Supply) -> TxOutcome<()> {
        if *self.status.lock() != TxStatus::Configuring {
            return Err(TxError::Bundle(nirva_core::Error::invalid_input(format!(
                "transform {} is no longer configuring",
                self.uid
            ))));
        }
        let mut supplied = self.supplied.lock();
        supplied.retain(|(n, _)| n != name);
        supplied.push((name.to_string(), s));
        Ok(())
    }

    /// Supply a scalar input
    pub fn set_input(&self, name: &str, value: impl Into<StrandValue>) -> TxOutcome<()> {
        self.supply(name, Supply::Values(vec![value.into()]))
    }

    /// Supply an array input
    pub fn set_input_array(&self, name: &str, values: Vec<StrandValue>) -> TxOutcome<()> {
        self.supply(name, Supply::Values(values))
    }

    /// Satisfy an input by connecting it to `remote`
    pub fn connect_input(&self, name: &str, remote: &Arc<Attribute>, flags: ConnFlags) -> TxOutcome<()> {
        self.supply(name, Supply::Connect(Arc::clone(remote), flags))
    }

    fn apply(&self, attr: &Attribute, s: Supply) -> TxOutcome<()> {
        match s {
            Supply::Values(values) => attr.write_local(values)?,
            Supply::Connect(remote, flags) => self.attrs.connect(attr.name(), &remote, flags)?,
        }
        Ok(())
    }

    // ========================================================================
    // Preparation
    // ========================================================================

    /// Validate capacities, create the attributes and pick a trajectory
    ///
    /// On failure every attribute created so far is removed and the
    /// transform stops in ERROR.
    pub fn prepare(&self) -> TxOutcome<()> {
        {
            let status = *self.status.lock();
            if status != TxStatus::Configuring {
                return Err(TxError::Thread(ThreadError::InvalidState(format!(
                    "cannot prepare from {:?}",
                    status
                ))));
            }
        }
        self.fire(HookId::PREPARING, HookPayload::None);
        match self.negotiate() {
            Ok(()) => {
                self.set_status(TxStatus::Ready);
                self.fire(HookId::PREPARED, HookPayload::None);
                Ok(())
            }
            Err(e) => {
                self.attrs.clear();
                self.stop(Err(&e));
                Err(e)
            }
        }
    }

    fn negotiate(&self) -> TxOutcome<()> {
        let contract = &self.contract;
        if contract.flags().contains(TxFlags::BROKEN) {
            return Err(TxError::ContractBroken(format!(
                "contract '{}' is flagged broken",
                contract.name()
            )));
        }
        contract.validate_caps(&self.caps)?;
        self.set_status(TxStatus::CapsValid);

        let mut supplied: FxHashMap<String, Supply> = self.supplied.lock().drain(..).collect();
        let mut missing = Vec::new();
        for def in contract.inputs() {
            let attr = self.attrs.add(def)?;
            match supplied.remove(&def.name) {
                Some(s) => self.apply(&attr, s)?,
                None if def.is_optional() => attr.reset_to_default()?,
                None => missing.push(def.name.clone()),
            }
        }
        breach_if_missing(&missing)?;
        for def in contract.outputs() {
            self.attrs.add(def)?;
        }

        self.set_status(TxStatus::Negotiating);
        let ctx = CondContext::caps(&self.caps)
            .with_attrs(&self.attrs)
            .with_status(TxStatus::Negotiating);
        let trajectory = contract.resolve_trajectory(&ctx)?;

        for map in trajectory.required_inputs() {
            if self.attrs.get(&map.name).is_some() {
                continue;
            }
            match supplied.remove(&map.name) {
                Some(s) => {
                    let attr = self.attrs.add(&map.def())?;
                    self.apply(&attr, s)?;
                }
                None => missing.push(map.name.clone()),
            }
        }
        breach_if_missing(&missing)?;

        // Anything else supplied is kept for functionals that map it optionally
        for (name, s) in supplied {
            let stype = match &s {
                Supply::Values(v) => v.first().map(StrandValue::strand_type),
                Supply::Connect(remote, _) => Some(remote.stype()),
            }
            .unwrap_or(StrandType::Proxied);
            let attr = self
                .attrs
                .add(&crate::attribute::AttrDef::new(name, stype).array())?;
            self.apply(&attr, s)?;
        }

        debug!(target: "nirva::tx", uid = %self.uid, trajectory = %trajectory.name(), "trajectory chosen");
        *self.trajectory.lock() = Some(trajectory);
        Ok(())
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Prepare if needed and queue the run on the runtime's pool
    pub fn start(self: &Arc<Self>, rt: &Runtime) -> TxOutcome<()> {
        if *self.status.lock() == TxStatus::Configuring {
            self.prepare()?;
        }
        {
            let status = *self.status.lock();
            if status != TxStatus::Ready {
                return Err(TxError::Thread(ThreadError::InvalidState(format!(
                    "cannot start from {:?}",
                    status
                ))));
            }
        }
        let weak = Arc::downgrade(self);
        let thread = ProcThread::<TxResult>::builder()
            .attrs(ThreadAttrs::NOTE_STTIME)
            .config(rt.config().thread_config())
            .cancellable(true)
            .pausable(true)
            .body(move |ctx| {
                let Some(tx) = weak.upgrade() else {
                    return Err(ThreadError::Destroyed);
                };
                let outcome = tx.run(ctx);
                tx.stop(outcome.as_ref().map(|_| ()));
                outcome
                    .map(|_| TxResult::Success)
                    .map_err(|e| ThreadError::from(&e))
            })
            .build();
        *self.thread.lock() = Some(thread.clone());
        self.set_status(TxStatus::Queued);
        if let Err(e) = thread.queue(rt.pool()) {
            let e = TxError::from(e);
            self.stop(Err(&e));
            return Err(e);
        }
        Ok(())
    }

    /// Run to completion and return the stored result
    pub fn execute(self: &Arc<Self>, rt: &Runtime) -> TxResult {
        match self.start(rt) {
            Ok(()) => self.wait(),
            Err(_) => self.result(),
        }
    }

    /// Block until the run stops; returns the stored result
    pub fn wait(&self) -> TxResult {
        let thread = self.thread.lock().clone();
        if let Some(t) = thread {
            let joined = t.join();
            if !self.status.lock().is_final() {
                let e = match joined {
                    Err(e) => TxError::from(e),
                    Ok(_) => TxError::Thread(ThreadError::InvalidState(
                        "run ended without a final status".into(),
                    )),
                };
                self.stop(Err(&e));
            }
        }
        self.result()
    }

    /// Wait up to `timeout` for the run to stop
    pub fn wait_done(&self, timeout: Option<Duration>) -> bool {
        let thread = self.thread.lock().clone();
        match thread {
            Some(t) => t.wait_done(timeout),
            None => self.status.lock().is_final(),
        }
    }

    fn run(&self, ctx: &ThreadContext) -> TxOutcome<()> {
        let trajectory = self
            .trajectory()
            .ok_or_else(|| TxError::TrajectoryInvalid("transform was not prepared".into()))?;
        self.set_status(TxStatus::Preparing);
        self.lock_inputs(&trajectory);
        self.set_status(TxStatus::Running);
        self.fire(HookId::TX_START, HookPayload::None);
        let outcome = self.walk(ctx, &trajectory);
        self.unlock_inputs();
        outcome
    }

    fn lock_inputs(&self, trajectory: &Trajectory) {
        let mut locked = self.locked.lock();
        for name in trajectory.pure_inputs() {
            if let Some(attr) = self.attrs.get(name) {
                attr.set_locked(true);
                locked.push(attr);
            }
        }
    }

    fn unlock_inputs(&self) {
        for attr in self.locked.lock().drain(..) {
            attr.set_locked(false);
        }
    }

    fn walk(&self, ctx: &ThreadContext, trajectory: &Trajectory) -> TxOutcome<()> {
        let mut at = Some(0);
        while let Some(idx) = at {
            ctx.check_cancelled()?;
            let segment = trajectory.segments().get(idx).ok_or_else(|| {
                TxError::TrajectoryInvalid(format!("no segment {}", idx))
            })?;
            self.run_segment(ctx, segment)?;
            at = trajectory.next_after(idx, &self.attrs)?;
        }
        Ok(())
    }

    fn run_segment(&self, ctx: &ThreadContext, segment: &Segment) -> TxOutcome<()> {
        self.fire(HookId::SEGMENT_START, HookPayload::Text(segment.name().to_string()));
        let mut scope: Vec<String> = Vec::new();
        let outcome = (|| -> TxOutcome<()> {
            for def in segment.locals() {
                if self.attrs.get(&def.name).is_none() {
                    self.attrs.add(def)?;
                    if !def.flags.contains(AttrFlags::EXTERN) {
                        scope.push(def.name.clone());
                    }
                }
            }
            for f in segment.steps() {
                ctx.sync_point()?;
                self.invoke(f, segment, &mut scope)?;
            }
            Ok(())
        })();
        for name in scope {
            if let Err(e) = self.attrs.remove(&name) {
                debug!(target: "nirva::tx", uid = %self.uid, attr = %name, error = %e, "segment local already gone");
            }
        }
        self.segments_run.fetch_add(1, Ordering::AcqRel);
        self.fire(HookId::SEGMENT_END, HookPayload::Text(segment.name().to_string()));
        outcome
    }

    fn ensure_outputs(&self, f: &Functional, scope: &mut Vec<String>) -> TxOutcome<()> {
        for m in f.maps().iter().filter(|m| m.is_output()) {
            if self.attrs.get(&m.name).is_some() {
                continue;
            }
            let mut def = m.def();
            if m.flags.contains(MapFlags::EXTERN) {
                def = def.flags(AttrFlags::EXTERN | AttrFlags::OUTPUT);
            } else {
                scope.push(m.name.clone());
            }
            self.attrs.add(&def)?;
        }
        if let Some(r) = f.return_attr() {
            if self.attrs.get(r).is_none() {
                self.attrs.add(
                    &crate::attribute::AttrDef::new(r, StrandType::Proxied).flags(AttrFlags::OUTPUT),
                )?;
            }
        }
        Ok(())
    }

    fn invoke(&self, f: &Functional, segment: &Segment, scope: &mut Vec<String>) -> TxOutcome<()> {
        self.ensure_outputs(f, scope)?;
        match f.kind() {
            FunctionalKind::Standard(func) => func(&self.attrs),
            FunctionalKind::Script(script) => script.run(f.name(), &self.attrs),
            FunctionalKind::Native(func) => {
                let mut sizes: FxHashMap<&str, usize> = FxHashMap::default();
                for m in f.maps().iter().filter(|m| m.is_output()) {
                    match &m.array_size {
                        ArraySize::Fixed(n) => {
                            sizes.insert(&m.name, *n);
                        }
                        ArraySize::Helper(h) if m.flags.contains(MapFlags::PRE_CALC_SIZE) => {
                            sizes.insert(&m.name, self.call_helper(segment, h)?);
                        }
                        _ => {}
                    }
                }
                let mut call = self.marshal(f, &sizes)?;
                func(&mut call)?;
                for (m, blob) in f.maps().iter().zip(0..call.len()) {
                    if let ArraySize::Helper(h) = &m.array_size {
                        if m.is_output() && !m.flags.contains(MapFlags::PRE_CALC_SIZE) {
                            let n = self.call_helper(segment, h)?;
                            let got = call.param(blob)?.values().len();
                            if got != n {
                                return Err(TxError::ArraySize(format!(
                                    "'{}' has {} elements, helper '{}' says {}",
                                    m.name, got, h, n
                                )));
                            }
                        }
                    }
                }
                self.unmarshal(f, call)
            }
        }
    }

    fn marshal(&self, f: &Functional, sizes: &FxHashMap<&str, usize>) -> TxOutcome<NativeCall> {
        let mut blobs = Vec::with_capacity(f.maps().len());
        for m in f.maps() {
            let mut blob = match self.attrs.get(&m.name) {
                Some(attr) => {
                    let stype = match attr.stype() {
                        t if t.is_deferred() => m.stype,
                        t => t,
                    };
                    let values = if m.is_input() { attr.get() } else { Vec::new() };
                    Blob::new(&m.name, m.flags, stype, values)?
                }
                None if m.is_optional() => Blob::new(&m.name, m.flags, m.stype, Vec::new())?,
                None => {
                    return Err(TxError::Marshal(format!(
                        "functional '{}' maps missing attribute '{}'",
                        f.name(),
                        m.name
                    )))
                }
            };
            if let Some(n) = sizes.get(m.name.as_str()) {
                blob.set_expected_len(*n);
            }
            blobs.push(blob);
        }
        Ok(NativeCall::new(blobs))
    }

    fn unmarshal(&self, f: &Functional, call: NativeCall) -> TxOutcome<()> {
        let (params, ret) = call.into_parts();
        for (m, blob) in f.maps().iter().zip(params) {
            if !m.is_output() {
                continue;
            }
            if blob.is_written() {
                if let Some(attr) = self.attrs.get(&m.name) {
                    attr.set(blob.into_values())?;
                }
            } else if !m.is_optional() {
                return Err(TxError::Unfulfilled(format!(
                    "functional '{}' did not write '{}'",
                    f.name(),
                    m.name
                )));
            }
        }
        if let Some(r) = f.return_attr() {
            let value = ret.ok_or_else(|| {
                TxError::Unfulfilled(format!("functional '{}' returned nothing", f.name()))
            })?;
            if let Some(attr) = self.attrs.get(r) {
                attr.set(vec![value])?;
            }
        }
        Ok(())
    }

    fn call_helper(&self, segment: &Segment, name: &str) -> TxOutcome<usize> {
        let helper = segment
            .helper(name)
            .ok_or_else(|| TxError::ArraySize(format!("no helper '{}'", name)))?;
        let FunctionalKind::Native(func) = helper.kind() else {
            return Err(TxError::ArraySize(format!("helper '{}' is not native", name)));
        };
        let mut call = self.marshal(helper, &FxHashMap::default())?;
        func(&mut call).map_err(|e| TxError::ArraySize(format!("helper '{}': {}", name, e)))?;
        size_from_return(name, call.return_value())
    }

    // ========================================================================
    // Stopping
    // ========================================================================

    fn stop(&self, outcome: Result<(), &TxError>) {
        {
            let mut status = self.status.lock();
            if status.is_final() {
                return;
            }
            let (next, result) = match outcome {
                Ok(()) => (TxStatus::Success, TxResult::Success),
                Err(e) => (e.status(), e.result()),
            };
            debug!(target: "nirva::tx", uid = %self.uid, from = ?*status, to = ?next, "status");
            *status = next;
            *self.result.lock() = result;
        }
        match outcome {
            Ok(()) => {
                debug!(target: "nirva::tx", uid = %self.uid, "transform succeeded");
                self.fire(HookId::COMPLETED, HookPayload::None);
            }
            Err(e) => {
                *self.error.lock() = Some(e.to_string());
                let text = HookPayload::Text(e.to_string());
                if e.is_breach() {
                    warn!(target: "nirva::tx", uid = %self.uid, error = %e, "contract breached");
                    self.fire(HookId::CONTRACT_BREACHED, text.clone());
                }
                match e.status() {
                    TxStatus::Cancelled => {
                        debug!(target: "nirva::tx", uid = %self.uid, "transform cancelled");
                        self.fire(HookId::CANCELLED, HookPayload::None);
                    }
                    TxStatus::TimedOut => {
                        warn!(target: "nirva::tx", uid = %self.uid, error = %e, "transform timed out");
                        self.fire(HookId::TIMED_OUT, text);
                    }
                    _ => {
                        if !e.is_breach() {
                            error!(target: "nirva::tx", uid = %self.uid, error = %e, "transform failed");
                        }
                        self.fire(HookId::ERROR, text);
                    }
                }
            }
        }
        self.fire(HookId::FINISHED, HookPayload::None);
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn ask(&self, hook: HookId) -> bool {
        self.hooks
            .trigger_request(&HookEvent::new(hook, self.uid))
            .is_yes()
    }

    /// Ask the transform to cancel
    ///
    /// A running transform stops at its next checkpoint; one that has not
    /// started stops at once. False once stopped or if CANCEL_REQUEST refused.
    pub fn request_cancel(&self) -> bool {
        if self.status.lock().is_final() || !self.ask(HookId::CANCEL_REQUEST) {
            return false;
        }
        let thread = self.thread.lock().clone();
        match thread {
            Some(t) => t.request_cancel(),
            None => {
                self.stop(Err(&TxError::Cancelled));
                true
            }
        }
    }

    /// Ask a running transform to pause at its next checkpoint
    pub fn request_pause(&self) -> bool {
        if !self.ask(HookId::PAUSE_REQUEST) {
            return false;
        }
        let thread = self.thread.lock().clone();
        thread.is_some_and(|t| t.request_pause())
    }

    /// Ask a paused transform to resume
    pub fn request_resume(&self) -> bool {
        if !self.ask(HookId::RESUME_REQUEST) {
            return false;
        }
        let thread = self.thread.lock().clone();
        thread.is_some_and(|t| t.request_resume())
    }
}

fn breach_if_missing(missing: &[String]) -> TxOutcome<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TxError::ContractBroken(format!(
            "missing mandatory input {}",
            missing.join(", ")
        )))
    }
}
