//! Object templates and instances
//!
//! An [`ObjectTemplate`] describes one object type: the attributes every
//! instance carries and the contracts it offers, each restricted to the
//! states in which it may be actioned. An [`ObjectInstance`] is a live
//! object of that type with its own state, subtype, attributes and hooks.

use crate::attribute::{AttrDef, AttrGroup};
use crate::contract::Contract;
use crate::error::{TxError, TxOutcome};
use crate::transform::Transform;
use nirva_core::{
    CapSet, HookId, Intent, IntentCap, ObjectState, ObjectType, Result, Uid,
};
use nirva_hooks::{HookDispatcher, HookEvent, HookPayload};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Offer {
    contract: Arc<Contract>,
    states: Vec<ObjectState>,
}

impl Offer {
    fn available_in(&self, state: ObjectState) -> bool {
        self.states.is_empty() || self.states.contains(&state)
    }
}

/// Static description of an object type
#[derive(Debug, Clone)]
pub struct ObjectTemplate {
    otype: ObjectType,
    name: String,
    attrs: Vec<AttrDef>,
    offers: Vec<Offer>,
}

impl ObjectTemplate {
    /// Template with no attributes or contracts
    pub fn new(otype: ObjectType, name: impl Into<String>) -> Self {
        Self {
            otype,
            name: name.into(),
            attrs: Vec::new(),
            offers: Vec::new(),
        }
    }

    /// Builder: attribute carried by every instance
    pub fn attr(mut self, def: AttrDef) -> Self {
        self.attrs.push(def);
        self
    }

    /// Builder: contract available in any state
    pub fn contract(self, contract: Arc<Contract>) -> Self {
        self.contract_in(contract, &[])
    }

    /// Builder: contract available only in `states`
    pub fn contract_in(mut self, contract: Arc<Contract>, states: &[ObjectState]) -> Self {
        self.offers.push(Offer {
            contract,
            states: states.to_vec(),
        });
        self
    }

    /// Object type
    pub fn otype(&self) -> ObjectType {
        self.otype
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute defs
    pub fn attr_defs(&self) -> &[AttrDef] {
        &self.attrs
    }

    /// Every contract, regardless of state
    pub fn contracts(&self) -> impl Iterator<Item = &Arc<Contract>> {
        self.offers.iter().map(|o| &o.contract)
    }
}

/// A live object
#[derive(Debug)]
pub struct ObjectInstance {
    template: Arc<ObjectTemplate>,
    subtype: RwLock<u64>,
    state: RwLock<ObjectState>,
    attrs: AttrGroup,
}

impl ObjectInstance {
    /// Instantiate `template` in NORMAL state
    ///
    /// Fires OBJECT_CREATED once every attribute exists.
    pub fn new(template: Arc<ObjectTemplate>, subtype: u64) -> Result<Arc<Self>> {
        let attrs = AttrGroup::new(Uid::new());
        for def in &template.attrs {
            attrs.add(def)?;
        }
        let obj = Arc::new(Self {
            template,
            subtype: RwLock::new(subtype),
            state: RwLock::new(ObjectState::Normal),
            attrs,
        });
        debug!(target: "nirva::object", uid = %obj.uid(), otype = %obj.otype(), "instance created");
        obj.hooks()
            .trigger_spontaneous(&HookEvent::new(HookId::OBJECT_CREATED, obj.uid()));
        Ok(obj)
    }

    /// Unique id
    pub fn uid(&self) -> Uid {
        self.attrs.uid()
    }

    /// Template the instance was made from
    pub fn template(&self) -> &Arc<ObjectTemplate> {
        &self.template
    }

    /// Object type
    pub fn otype(&self) -> ObjectType {
        self.template.otype
    }

    /// Attributes
    pub fn attrs(&self) -> &AttrGroup {
        &self.attrs
    }

    /// Object hooks
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        self.attrs.hooks()
    }

    /// Current state
    pub fn state(&self) -> ObjectState {
        *self.state.read()
    }

    /// Current subtype
    pub fn subtype(&self) -> u64 {
        *self.subtype.read()
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// `Vetoed` if an ALTERING_STATE callback refuses; the state is unchanged.
    pub fn set_state(&self, next: ObjectState) -> Result<()> {
        let mut state = self.state.write();
        let old = *state;
        if old == next {
            return Ok(());
        }
        let ev = HookEvent::new(HookId::ALTERING_STATE, self.uid()).with_payload(
            HookPayload::StateChange {
                old: old.code() as i64,
                new: next.code() as i64,
            },
        );
        self.hooks().trigger_data_before(&ev)?;
        *state = next;
        drop(state);
        debug!(target: "nirva::object", uid = %self.uid(), from = ?old, to = ?next, "state");
        self.hooks().trigger_data_after(&HookEvent {
            hook: HookId::STATE_ALTERED,
            ..ev
        });
        Ok(())
    }

    /// Change the subtype, bracketed by MODIFYING_SUBTYPE / SUBTYPE_MODIFIED
    pub fn set_subtype(&self, next: u64) -> Result<()> {
        let mut subtype = self.subtype.write();
        let old = *subtype;
        if old == next {
            return Ok(());
        }
        let ev = HookEvent::new(HookId::MODIFYING_SUBTYPE, self.uid()).with_payload(
            HookPayload::StateChange {
                old: old as i64,
                new: next as i64,
            },
        );
        self.hooks().trigger_data_before(&ev)?;
        *subtype = next;
        drop(subtype);
        self.hooks().trigger_data_after(&HookEvent {
            hook: HookId::SUBTYPE_MODIFIED,
            ..ev
        });
        Ok(())
    }

    fn offers(&self) -> impl Iterator<Item = &Offer> {
        let state = self.state();
        self.template
            .offers
            .iter()
            .filter(move |o| o.available_in(state))
    }

    /// Intents the object accepts in its current state
    pub fn get_intents(&self) -> Vec<IntentCap> {
        let mut out: Vec<IntentCap> = Vec::new();
        for offer in self.offers() {
            let ic = IntentCap::new(offer.contract.intent(), offer.contract.caps().clone());
            if !out.contains(&ic) {
                out.push(ic);
            }
        }
        out
    }

    /// First contract for `intent` whose capacities accept `caps`
    pub fn contract_for(&self, intent: Intent, caps: &CapSet) -> Option<Arc<Contract>> {
        self.offers()
            .filter(|o| o.contract.intent() == intent)
            .find(|o| o.contract.validate_caps(caps).is_ok())
            .map(|o| Arc::clone(&o.contract))
    }

    /// Action the contract for `intent`
    ///
    /// # Errors
    ///
    /// `InvalidCaps` if no contract available in this state matches.
    pub fn action(&self, intent: Intent, caps: CapSet) -> TxOutcome<Arc<Transform>> {
        let contract = self.contract_for(intent, &caps).ok_or_else(|| {
            TxError::InvalidCaps(format!(
                "{} in state {:?} has no contract for {}",
                self.otype(),
                self.state(),
                intent
            ))
        })?;
        Ok(contract.action(caps))
    }

    /// Fire DESTRUCTION, drop the attributes and become a zombie
    ///
    /// Only the first call has any effect.
    pub fn destroy(&self) {
        {
            let mut state = self.state.write();
            if *state == ObjectState::Zombie {
                return;
            }
            *state = ObjectState::Zombie;
        }
        self.hooks()
            .trigger_spontaneous(&HookEvent::new(HookId::DESTRUCTION, self.uid()));
        self.attrs.clear();
        debug!(target: "nirva::object", uid = %self.uid(), "instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{Segment, Trajectory};
    use nirva_core::{caps, BundleLike, Error, StrandType};
    use nirva_hooks::Callback;

    fn contract(name: &str, intent: Intent, cap: Option<&str>) -> Arc<Contract> {
        let mut b = Contract::builder(name, intent)
            .trajectory(Trajectory::new("t").segment(Segment::new("s")));
        if let Some(c) = cap {
            b = b.cap(c);
        }
        b.build().unwrap()
    }

    fn clip() -> Arc<ObjectTemplate> {
        Arc::new(
            ObjectTemplate::new(ObjectType::CLIP, "clip")
                .attr(AttrDef::with_default("frames", 0))
                .attr(AttrDef::new("title", StrandType::String).optional())
                .contract(contract("load", Intent::CREATE_BUNDLE, None))
                .contract_in(
                    contract("play", Intent::PLAY, Some(caps::LOCAL)),
                    &[ObjectState::Prepared],
                )
                .contract_in(
                    contract("stream", Intent::PLAY, Some(caps::REMOTE)),
                    &[ObjectState::Prepared],
                ),
        )
    }

    #[test]
    fn test_attributes_from_template() {
        let obj = ObjectInstance::new(clip(), 0).unwrap();
        assert_eq!(obj.otype(), ObjectType::CLIP);
        assert_eq!(obj.state(), ObjectState::Normal);
        assert_eq!(obj.attrs().get_int("frames").unwrap(), 0);
        assert!(obj.attrs().get("title").is_some());
    }

    #[test]
    fn test_intents_follow_state() {
        let obj = ObjectInstance::new(clip(), 0).unwrap();
        let intents: Vec<Intent> = obj.get_intents().into_iter().map(|i| i.intent).collect();
        assert_eq!(intents, vec![Intent::CREATE_BUNDLE]);
        assert!(obj.contract_for(Intent::PLAY, &CapSet::new()).is_none());

        obj.set_state(ObjectState::Prepared).unwrap();
        assert_eq!(obj.get_intents().len(), 3);
        let remote = CapSet::new().with(caps::REMOTE);
        assert_eq!(obj.contract_for(Intent::PLAY, &remote).unwrap().name(), "stream");
        assert!(obj.action(Intent::PLAY, CapSet::new().with(caps::VIDEO)).is_err());
        let tx = obj.action(Intent::PLAY, remote).unwrap();
        assert_eq!(tx.contract().name(), "stream");
    }

    #[test]
    fn test_state_change_veto() {
        let obj = ObjectInstance::new(clip(), 0).unwrap();
        obj.hooks()
            .add(
                HookId::ALTERING_STATE,
                Callback::check("no_busy", |ev| {
                    !matches!(ev.payload, HookPayload::StateChange { new, .. } if new == ObjectState::Busy.code() as i64)
                }),
            )
            .unwrap();
        assert!(matches!(obj.set_state(ObjectState::Busy), Err(Error::Vetoed { .. })));
        assert_eq!(obj.state(), ObjectState::Normal);
        obj.set_state(ObjectState::ActiveIdle).unwrap();
        assert_eq!(obj.state(), ObjectState::ActiveIdle);
    }

    #[test]
    fn test_destroy() {
        let obj = ObjectInstance::new(clip(), 7).unwrap();
        assert_eq!(obj.subtype(), 7);
        obj.set_subtype(8).unwrap();
        obj.destroy();
        assert_eq!(obj.state(), ObjectState::Zombie);
        assert!(obj.attrs().is_empty());
        assert!(obj.get_intents().iter().all(|i| i.intent == Intent::CREATE_BUNDLE));
    }
}
