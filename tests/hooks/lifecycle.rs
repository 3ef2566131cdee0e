//! Transform lifecycle hooks

use crate::common::*;
use nirva::{AddMode, Callback, HookEvent, HookId, HookPayload};
use parking_lot::Mutex;
use std::sync::Arc;

const LIFECYCLE: &[HookId] = &[
    HookId::PREPARING,
    HookId::PREPARED,
    HookId::TX_START,
    HookId::SEGMENT_START,
    HookId::SEGMENT_END,
    HookId::COMPLETED,
    HookId::CONTRACT_BREACHED,
    HookId::ERROR,
    HookId::FINISHED,
];

fn record(tx: &nirva::Transform) -> Arc<Mutex<Vec<HookId>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for hook in LIFECYCLE {
        let l = Arc::clone(&log);
        tx.hooks()
            .add(*hook, Callback::check("log", move |ev: &HookEvent| {
                l.lock().push(ev.hook);
                true
            }))
            .unwrap();
    }
    log
}

#[test]
fn successful_run_fires_in_order() {
    let rt = runtime();
    let tx = adder().action(CapSet::new());
    let log = record(&tx);
    tx.set_input("a", 1).unwrap();
    tx.set_input("b", 2).unwrap();
    assert_eq!(tx.execute(&rt), TxResult::Success);
    assert_eq!(
        *log.lock(),
        vec![
            HookId::PREPARING,
            HookId::PREPARED,
            HookId::TX_START,
            HookId::SEGMENT_START,
            HookId::SEGMENT_END,
            HookId::COMPLETED,
            HookId::FINISHED,
        ]
    );
}

#[test]
fn breach_fires_before_anything_runs() {
    let rt = runtime();
    let tx = adder().action(CapSet::new());
    let log = record(&tx);
    tx.set_input("a", 1).unwrap();
    assert_eq!(tx.execute(&rt), TxResult::ContractBroken);
    assert_eq!(
        *log.lock(),
        vec![
            HookId::PREPARING,
            HookId::CONTRACT_BREACHED,
            HookId::ERROR,
            HookId::FINISHED,
        ]
    );
}

#[test]
fn segment_hooks_name_the_segment() {
    let rt = runtime();
    let names = Arc::new(Mutex::new(Vec::new()));
    let tx = adder().action(CapSet::new());
    let n = Arc::clone(&names);
    tx.hooks()
        .add(
            HookId::SEGMENT_START,
            Callback::check("names", move |ev| {
                if let HookPayload::Text(s) = &ev.payload {
                    n.lock().push(s.clone());
                }
                true
            }),
        )
        .unwrap();
    tx.set_input("a", 1).unwrap();
    tx.set_input("b", 1).unwrap();
    tx.execute(&rt);
    assert_eq!(*names.lock(), vec!["compute".to_string()]);
}

#[test]
fn one_shot_callback_runs_once_across_transforms() {
    let rt = runtime();
    let hits = Arc::new(Mutex::new(0));
    let contract = adder();
    let h = Arc::clone(&hits);
    let first = contract.action(CapSet::new());
    first
        .hooks()
        .add(
            HookId::SEGMENT_END,
            Callback::check("once", move |_| {
                *h.lock() += 1;
                true
            })
            .mode(AddMode::ONE_SHOT),
        )
        .unwrap();
    first.set_input("a", 1).unwrap();
    first.set_input("b", 1).unwrap();
    first.execute(&rt);
    assert_eq!(first.hooks().callback_count(HookId::SEGMENT_END), 0);
    assert_eq!(*hits.lock(), 1);
}
