//! Object instance state hooks

use crate::common::*;
use nirva::{Callback, HookId, HookPayload, ObjectInstance, ObjectState, ObjectTemplate, ObjectType};
use parking_lot::Mutex;
use std::sync::Arc;

fn template() -> Arc<ObjectTemplate> {
    Arc::new(
        ObjectTemplate::new(ObjectType::CLIP, "clip")
            .contract(adder())
            .attr(AttrDef::with_default("frames", 0)),
    )
}

#[test]
fn state_edges_are_observable() {
    let obj = ObjectInstance::new(template(), 0).unwrap();
    let edges = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&edges);
    obj.hooks()
        .add(
            HookId::STATE_ALTERED,
            Callback::check("edges", move |ev| {
                if let HookPayload::StateChange { old, new } = ev.payload {
                    e.lock().push((old, new));
                }
                true
            }),
        )
        .unwrap();
    obj.set_state(ObjectState::Prepared).unwrap();
    obj.set_state(ObjectState::Prepared).unwrap();
    obj.set_state(ObjectState::Busy).unwrap();
    assert_eq!(
        *edges.lock(),
        vec![
            (ObjectState::Normal.code() as i64, ObjectState::Prepared.code() as i64),
            (ObjectState::Prepared.code() as i64, ObjectState::Busy.code() as i64),
        ]
    );
}

#[test]
fn destruction_fires_once_per_instance() {
    let obj = ObjectInstance::new(template(), 0).unwrap();
    let hits = Arc::new(Mutex::new(0));
    let h = Arc::clone(&hits);
    obj.hooks()
        .add(
            HookId::DESTRUCTION,
            Callback::check("bye", move |_| {
                *h.lock() += 1;
                true
            }),
        )
        .unwrap();
    obj.destroy();
    obj.destroy();
    assert_eq!(*hits.lock(), 1);
    assert_eq!(obj.state(), ObjectState::Zombie);
}
