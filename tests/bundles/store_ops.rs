//! Store operations through the runtime

use crate::common::*;
use nirva::{bundle_types, Callback, Error, HookId, ObjectState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn with_node() -> Arc<Runtime> {
    let rt = runtime();
    rt.blueprints().register("NODE", &node_bundledef()).unwrap();
    rt
}

#[test]
fn handle_reads_through_bundle_like() {
    let rt = with_node();
    let id = rt.store().build("NODE").value(".payload", 2.5).create().unwrap();
    let h = rt.store().handle(id).unwrap();
    assert_eq!(h.get_int(".weight").unwrap(), 5);
    assert_eq!(h.get_double(".payload").unwrap(), 2.5);
    assert_eq!(h.bundle_type(), "NODE");
}

#[test]
fn tree_teardown_cascades_and_zombifies() {
    let rt = with_node();
    let store = rt.store();
    let root = store.create("NODE").unwrap();
    let kids: Vec<_> = (0..3).map(|_| store.create("NODE").unwrap()).collect();
    for k in &kids {
        store
            .array_append(root, ".children", StrandValue::BundlePtr(Some(*k)))
            .unwrap();
    }
    let destroyed = Arc::new(AtomicUsize::new(0));
    for id in kids.iter().copied().chain([root]) {
        let d = Arc::clone(&destroyed);
        store
            .hooks(id)
            .unwrap()
            .add(
                HookId::DESTRUCTION,
                Callback::check("count", move |_| {
                    d.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
    }
    assert!(store.unref_bundle(root).unwrap());
    assert_eq!(destroyed.load(Ordering::SeqCst), 4);
    for k in kids {
        assert_eq!(store.state(k), ObjectState::Zombie);
        assert!(matches!(store.get_value(k, ".weight"), Err(Error::Zombie(_))));
    }
}

#[test]
fn copy_and_snapshot_a_subtree() {
    let rt = with_node();
    let store = rt.store();
    let root = store.create("NODE").unwrap();
    let kid = store.create("NODE").unwrap();
    store
        .array_append(root, ".children", StrandValue::BundlePtr(Some(kid)))
        .unwrap();
    store.set_value(kid, ".weight", 12).unwrap();

    let copy = store.copy_bundle(root).unwrap();
    let json = store.to_json(copy).unwrap();
    assert_eq!(json["type"], "NODE");
    assert_eq!(json["strands"][".children"][0]["strands"][".weight"], 12);
    assert_ne!(
        store.array_get(copy, ".children", 0).unwrap(),
        StrandValue::BundlePtr(Some(kid))
    );
    assert!(store.describe_layout(root).unwrap().contains("weight"));
}

#[test]
fn keyed_arrays_on_standard_bundle() {
    let rt = runtime();
    let store = rt.store();
    let id = store.create(bundle_types::KEYED_NAME).unwrap();
    store.add_value_by_key(id, ".entries", "fps", 25.into()).unwrap();
    store.add_value_by_key(id, ".entries", "depth", 8.into()).unwrap();
    assert_eq!(store.get_value_by_key(id, ".entries", "fps").unwrap(), StrandValue::Int(25));
    store.remove_value_by_key(id, ".entries", "fps").unwrap();
    assert!(!store.has_value_for_key(id, ".entries", "fps").unwrap());
    assert_eq!(
        store
            .lookup_item_in_array(id, ".entries", &StrandValue::Int(8))
            .unwrap(),
        Some(0)
    );
}

#[test]
fn readonly_and_typed_strands_enforced() {
    let rt = with_node();
    let store = rt.store();
    let id = store.create("NODE").unwrap();
    store.set_value(id, ".label", "x").unwrap();
    assert!(matches!(store.set_value(id, ".label", "y"), Err(Error::ReadOnly(_))));
    assert!(matches!(
        store.set_value(id, ".weight", "heavy"),
        Err(Error::WrongType { .. })
    ));
    assert!(matches!(store.set_value(id, ".unknown", 1), Err(Error::Schema(_))));
}
