//! Contracts
//!
//! A [`Contract`] is the reusable template behind a transform: the intent it
//! serves, the capacities a caller may choose from, a condition those
//! choices must satisfy, the declared inputs and outputs, and the candidate
//! trajectories with the cascade that picks one.

use crate::attribute::AttrDef;
use crate::condition::{Cascade, CondContext, Condition, Decision};
use crate::error::{TxError, TxOutcome};
use crate::trajectory::Trajectory;
use crate::transform::Transform;
use nirva_core::{CapSet, Intent, TxFlags, Uid};
use std::sync::Arc;
use tracing::warn;

/// Template for transforms serving one intent
#[derive(Debug)]
pub struct Contract {
    uid: Uid,
    name: String,
    intent: Intent,
    caps: CapSet,
    valid_caps: Condition,
    cascade: Cascade,
    trajectories: Vec<Arc<Trajectory>>,
    inputs: Vec<AttrDef>,
    outputs: Vec<AttrDef>,
    flags: TxFlags,
}

impl Contract {
    /// Start building a contract
    pub fn builder(name: impl Into<String>, intent: Intent) -> ContractBuilder {
        ContractBuilder::new(name, intent)
    }

    /// Unique id
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Intent served
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Capacities a caller may choose from; empty allows any
    pub fn caps(&self) -> &CapSet {
        &self.caps
    }

    /// Flags
    pub fn flags(&self) -> TxFlags {
        self.flags
    }

    /// Declared inputs
    pub fn inputs(&self) -> &[AttrDef] {
        &self.inputs
    }

    /// Declared outputs
    pub fn outputs(&self) -> &[AttrDef] {
        &self.outputs
    }

    /// Candidate trajectories
    pub fn trajectories(&self) -> &[Arc<Trajectory>] {
        &self.trajectories
    }

    /// Check a capacity choice
    ///
    /// # Errors
    ///
    /// `InvalidCaps` if a capacity is outside the template or the validity
    /// condition is not satisfied.
    pub fn validate_caps(&self, chosen: &CapSet) -> TxOutcome<()> {
        if self.flags.contains(TxFlags::NO_NEGOTIATE) {
            return Ok(());
        }
        if !self.caps.is_empty() {
            if let Some(bad) = chosen.iter().find(|c| !self.caps.has(c)) {
                return Err(TxError::InvalidCaps(format!(
                    "'{}' is not offered by contract '{}'",
                    bad, self.name
                )));
            }
        }
        match self.valid_caps.evaluate(&CondContext::caps(chosen)) {
            r if r.is_satisfied() => Ok(()),
            r => Err(TxError::InvalidCaps(format!(
                "contract '{}' rejects {:?} ({:?})",
                self.name,
                chosen.iter().collect::<Vec<_>>(),
                r
            ))),
        }
    }

    /// Choose a trajectory for `ctx`
    ///
    /// # Errors
    ///
    /// `TrajectoryInvalid` if the cascade finds none or names one that does
    /// not exist.
    pub fn resolve_trajectory(&self, ctx: &CondContext<'_>) -> TxOutcome<Arc<Trajectory>> {
        match self.cascade.evaluate(ctx) {
            Decision::Matched(i) => self.trajectories.get(i).cloned().ok_or_else(|| {
                TxError::TrajectoryInvalid(format!(
                    "contract '{}' has no trajectory {}",
                    self.name, i
                ))
            }),
            other => {
                warn!(target: "nirva::tx", contract = %self.name, decision = ?other, "no trajectory");
                Err(TxError::TrajectoryInvalid(format!(
                    "contract '{}' found no trajectory: {:?}",
                    self.name, other
                )))
            }
        }
    }

    /// New transform for this contract, in CONFIGURING
    pub fn action(self: &Arc<Self>, caps: CapSet) -> Arc<Transform> {
        Transform::new(Arc::clone(self), caps)
    }
}

/// Builder for [`Contract`]
#[derive(Debug)]
#[must_use]
pub struct ContractBuilder {
    name: String,
    intent: Intent,
    caps: CapSet,
    valid_caps: Condition,
    cascade: Cascade,
    trajectories: Vec<Trajectory>,
    inputs: Vec<AttrDef>,
    outputs: Vec<AttrDef>,
    flags: TxFlags,
}

impl ContractBuilder {
    /// Builder for a contract serving `intent`
    pub fn new(name: impl Into<String>, intent: Intent) -> Self {
        Self {
            name: name.into(),
            intent,
            caps: CapSet::new(),
            valid_caps: Condition::always(),
            cascade: Cascade::new(),
            trajectories: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            flags: TxFlags::empty(),
        }
    }

    /// Offer a capacity
    pub fn cap(mut self, cap: impl Into<String>) -> Self {
        self.caps.add(cap);
        self
    }

    /// Condition a capacity choice must satisfy
    pub fn valid_caps(mut self, cond: Condition) -> Self {
        self.valid_caps = cond;
        self
    }

    /// Declare an input; non-optional inputs must be supplied
    pub fn input(mut self, def: AttrDef) -> Self {
        self.inputs.push(def);
        self
    }

    /// Declare an output, created when the transform is prepared
    pub fn output(mut self, def: AttrDef) -> Self {
        self.outputs.push(def);
        self
    }

    /// Add a candidate trajectory
    pub fn trajectory(mut self, t: Trajectory) -> Self {
        self.trajectories.push(t);
        self
    }

    /// Decision tree choosing among the trajectories
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Add flags
    pub fn flags(mut self, flags: TxFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// `TrajectoryInvalid` without trajectories or when one fails
    /// validation; `ContractBroken` for duplicate attribute names.
    pub fn build(self) -> TxOutcome<Arc<Contract>> {
        if self.trajectories.is_empty() {
            return Err(TxError::TrajectoryInvalid(format!(
                "contract '{}' has no trajectory",
                self.name
            )));
        }
        self.trajectories.iter().try_for_each(Trajectory::validate)?;
        let mut seen: Vec<&str> = Vec::new();
        for def in self.inputs.iter().chain(&self.outputs) {
            if seen.contains(&def.name.as_str()) {
                return Err(TxError::ContractBroken(format!(
                    "attribute '{}' declared twice in contract '{}'",
                    def.name, self.name
                )));
            }
            seen.push(&def.name);
        }
        Ok(Arc::new(Contract {
            uid: Uid::new(),
            name: self.name,
            intent: self.intent,
            caps: self.caps,
            valid_caps: self.valid_caps,
            cascade: self.cascade,
            trajectories: self.trajectories.into_iter().map(Arc::new).collect(),
            inputs: self.inputs,
            outputs: self.outputs,
            flags: self.flags,
        }))
    }
}
