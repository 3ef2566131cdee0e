//! Capacity negotiation and trajectory choice

use crate::common::*;
use nirva::{caps, Branch, Cascade, Condition, Operand, TxError};
use std::sync::Arc;

fn scaler() -> Arc<Contract> {
    let times = |n: i32| {
        Segment::new("scale").functional(Functional::script("scale", &format!("out = x * {}", n)).unwrap())
    };
    Contract::builder("scale", Intent::PROCESS)
        .cap(caps::LOCAL)
        .cap(caps::REMOTE)
        .valid_caps(Condition::Not(Box::new(Condition::And(vec![
            Condition::HasCap(caps::LOCAL.into()),
            Condition::HasCap(caps::REMOTE.into()),
        ]))))
        .input(AttrDef::with_default("x", 0))
        .output(AttrDef::new("out", StrandType::Int))
        .trajectory(Trajectory::new("local").segment(times(2)))
        .trajectory(Trajectory::new("remote").segment(times(3)))
        .trajectory(Trajectory::new("big").segment(times(0)))
        .cascade(
            Cascade::new()
                .node(
                    Condition::Gt(Operand::attr("x"), Operand::value(100)),
                    Branch::Leaf(Some(2)),
                    Branch::Node(1),
                )
                .node(
                    Condition::HasCap(caps::REMOTE.into()),
                    Branch::Leaf(Some(1)),
                    Branch::Leaf(Some(0)),
                ),
        )
        .build()
        .unwrap()
}

fn run(caps: CapSet, x: i32) -> (TxResult, Option<i32>, Option<String>) {
    let rt = runtime();
    let tx = scaler().action(caps);
    tx.set_input("x", x).unwrap();
    let result = tx.execute(&rt);
    let out = tx.attrs().get_int("out").ok();
    (result, out, tx.trajectory().map(|t| t.name().to_string()))
}

#[test]
fn capacities_pick_the_trajectory() {
    assert_eq!(
        run(CapSet::new().with(caps::LOCAL), 5),
        (TxResult::Success, Some(10), Some("local".into()))
    );
    assert_eq!(
        run(CapSet::new().with(caps::REMOTE), 5),
        (TxResult::Success, Some(15), Some("remote".into()))
    );
}

#[test]
fn attribute_values_pick_the_trajectory() {
    assert_eq!(
        run(CapSet::new().with(caps::REMOTE), 500),
        (TxResult::Success, Some(0), Some("big".into()))
    );
}

#[test]
fn conflicting_capacities_are_refused() {
    let both = CapSet::new().with(caps::LOCAL).with(caps::REMOTE);
    let (result, out, trajectory) = run(both, 5);
    assert_eq!(result, TxResult::ContractWasWrong);
    assert_eq!(out, None);
    assert_eq!(trajectory, None);
}

#[test]
fn capacity_outside_the_contract_is_refused() {
    let tx = scaler().action(CapSet::new().with(caps::AUDIO));
    tx.set_input("x", 1).unwrap();
    assert!(matches!(tx.prepare(), Err(TxError::InvalidCaps(_))));
}
