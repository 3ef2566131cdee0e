//! Attribute value and connection hooks

use crate::common::*;
use nirva::{AttrGroup, Callback, ConnFlags, Error, HookId, HookPayload, RequestResponse};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn value_hooks_bracket_a_write() {
    let group = AttrGroup::default();
    let attr = group.add(&AttrDef::with_default("gain", 1)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for hook in [HookId::UPDATING_VALUE, HookId::VALUE_UPDATED] {
        let s = Arc::clone(&seen);
        attr.hooks()
            .add(
                hook,
                Callback::check("watch", move |ev| {
                    if let HookPayload::ValueChange { old, new, .. } = &ev.payload {
                        s.lock().push((ev.hook, old.clone(), new.clone()));
                    }
                    true
                }),
            )
            .unwrap();
    }
    attr.set_value(3).unwrap();
    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, HookId::UPDATING_VALUE);
    assert_eq!(seen[0].1, vec![StrandValue::Int(1)]);
    assert_eq!(seen[1].2, vec![StrandValue::Int(3)]);
}

#[test]
fn vetoed_write_keeps_value() {
    let group = AttrGroup::default();
    let attr = group.add(&AttrDef::with_default("gain", 1)).unwrap();
    attr.hooks()
        .add(HookId::UPDATING_VALUE, Callback::check("clamp", |ev| {
            !matches!(&ev.payload, HookPayload::ValueChange { new, .. }
                if new.first().and_then(StrandValue::as_int).is_some_and(|v| v > 10))
        }))
        .unwrap();
    attr.set_value(5).unwrap();
    assert!(matches!(attr.set_value(50), Err(Error::Vetoed { .. })));
    assert_eq!(attr.get_value().unwrap(), StrandValue::Int(5));
}

#[test]
fn read_write_connection_needs_remote_consent() {
    let local = AttrGroup::default();
    local.add(&AttrDef::new("level", StrandType::Int)).unwrap();
    let remote_group = AttrGroup::default();
    let remote = remote_group.add(&AttrDef::with_default("level", 4)).unwrap();
    remote
        .hooks()
        .add(
            HookId::ATTR_CONNECT_RW_REQUEST,
            Callback::respond("readonly", |_| RequestResponse::No).registrant(remote.uid()),
        )
        .unwrap();

    assert!(local.connect("level", &remote, ConnFlags::READ_WRITE).is_err());
    assert!(!local.get("level").unwrap().is_connected());

    local.connect("level", &remote, ConnFlags::empty()).unwrap();
    assert_eq!(local.get_int("level").unwrap(), 4);
    assert!(matches!(local.set_value("level", 1.into()), Err(Error::ReadOnly(_))));

    local.disconnect("level").unwrap();
    assert!(!local.get("level").unwrap().is_connected());
}
