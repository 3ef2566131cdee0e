//! End-to-end contract scenarios

use crate::common::*;
use nirva::{Attribute, ConnFlags, TxError};
use std::sync::Arc;

#[test]
fn adding_three_and_four() {
    let rt = runtime();
    let tx = adder().action(CapSet::new());
    tx.set_input("a", 3).unwrap();
    tx.set_input("b", 4).unwrap();

    assert_eq!(tx.execute(&rt), TxResult::Success);
    assert_eq!(tx.status(), TxStatus::Success);
    assert_eq!(tx.result().code(), TxResult::Success.code());
    assert_eq!(tx.attrs().get_int("out").unwrap(), 7);
    assert!(tx.error().is_none());
    assert!(tx.started_at().unwrap() <= tx.finished_at().unwrap());
}

#[test]
fn missing_input_breaches_before_any_segment() {
    let rt = runtime();
    let tx = adder().action(CapSet::new());
    tx.set_input("a", 3).unwrap();

    assert_eq!(tx.execute(&rt), TxResult::ContractBroken);
    assert_eq!(tx.status(), TxStatus::Error);
    assert_eq!(tx.segments_run(), 0);
    assert!(tx.attrs().is_empty());
    assert!(tx.started_at().is_none());
}

#[test]
fn explicit_prepare_reports_the_breach() {
    let tx = adder().action(CapSet::new());
    tx.set_input("b", 1).unwrap();
    assert!(matches!(tx.prepare(), Err(TxError::ContractBroken(_))));
    assert!(tx.attrs().is_empty());
}

#[test]
fn many_transforms_share_the_pool() {
    let rt = runtime();
    let contract = adder();
    let txs: Vec<_> = (0..32)
        .map(|i| {
            let tx = contract.action(CapSet::new());
            tx.set_input("a", i).unwrap();
            tx.set_input("b", 100).unwrap();
            tx.start(&rt).unwrap();
            tx
        })
        .collect();
    for (i, tx) in txs.iter().enumerate() {
        assert_eq!(tx.wait(), TxResult::Success);
        assert_eq!(tx.attrs().get_int("out").unwrap(), i as i32 + 100);
    }
}

#[test]
fn output_of_one_transform_feeds_another() {
    let rt = runtime();
    let first = adder().action(CapSet::new());
    first.set_input("a", 1).unwrap();
    first.set_input("b", 2).unwrap();
    assert_eq!(first.execute(&rt), TxResult::Success);

    let out: Arc<Attribute> = first.attrs().get("out").unwrap();
    let second = adder().action(CapSet::new());
    second.connect_input("a", &out, ConnFlags::empty()).unwrap();
    second.set_input("b", 10).unwrap();
    assert_eq!(second.execute(&rt), TxResult::Success);
    assert_eq!(second.attrs().get_int("out").unwrap(), 13);
}

#[test]
fn script_functional_computes_outputs() {
    let rt = runtime();
    let area = Contract::builder("area", Intent::PROCESS)
        .input(AttrDef::with_default("w", 0))
        .input(AttrDef::with_default("h", 0))
        .output(AttrDef::new("area", StrandType::Int))
        .output(AttrDef::new("half", StrandType::Double))
        .trajectory(Trajectory::new("calc").segment(
            Segment::new("calc").functional(
                Functional::script("area", "area = w * h\nhalf = area / 2.0").unwrap(),
            ),
        ))
        .build()
        .unwrap();
    let tx = area.action(CapSet::new());
    tx.set_input("w", 6).unwrap();
    tx.set_input("h", 7).unwrap();
    assert_eq!(tx.execute(&rt), TxResult::Success);
    assert_eq!(tx.attrs().get_int("area").unwrap(), 42);
    assert_eq!(tx.attrs().get_double("half").unwrap(), 21.0);
}

#[test]
fn failing_functional_stops_the_trajectory() {
    let rt = runtime();
    let c = Contract::builder("div", Intent::PROCESS)
        .input(AttrDef::with_default("n", 0))
        .input(AttrDef::with_default("d", 0))
        .output(AttrDef::new("q", StrandType::Int))
        .trajectory(
            Trajectory::new("t")
                .segment(Segment::new("divide").functional(Functional::script("div", "q = n / d").unwrap()))
                .segment(Segment::new("never").functional(Functional::script("bump", "q = q + 1").unwrap())),
        )
        .build()
        .unwrap();
    let tx = c.action(CapSet::new());
    tx.set_input("n", 1).unwrap();
    tx.set_input("d", 0).unwrap();
    assert_eq!(tx.execute(&rt), TxResult::Error);
    assert_eq!(tx.status(), TxStatus::Error);
    assert_eq!(tx.segments_run(), 1);
    assert!(tx.error().is_some());
}
