//! Cancel, pause and resume of running transforms

use crate::common::*;
use nirva::{Callback, HookId, NextSegment, RequestResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loops over one segment until `counter` reaches `limit`
fn counting(counter: Arc<AtomicUsize>, limit: usize) -> Arc<Contract> {
    let c = Arc::clone(&counter);
    Contract::builder("count", Intent::PROCESS)
        .trajectory(
            Trajectory::new("loop")
                .segment(
                    Segment::new("tick")
                        .functional(Functional::standard("tick", move |_| {
                            c.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(1));
                            Ok(())
                        }))
                        .functional(Functional::standard("noop", |_| Ok(()))),
                )
                .selector(move |_, _| {
                    if counter.load(Ordering::SeqCst) >= limit {
                        NextSegment::End
                    } else {
                        NextSegment::Index(0)
                    }
                }),
        )
        .build()
        .unwrap()
}

#[test]
fn cancel_stops_a_looping_transform() {
    let rt = runtime();
    let counter = Arc::new(AtomicUsize::new(0));
    let tx = counting(Arc::clone(&counter), usize::MAX).action(CapSet::new());
    tx.start(&rt).unwrap();
    assert!(wait_until(Duration::from_secs(5), || counter.load(Ordering::SeqCst) > 3));
    assert!(tx.request_cancel());
    assert_eq!(tx.wait(), TxResult::Cancelled);
    assert_eq!(tx.status(), TxStatus::Cancelled);
    let after = counter.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.load(Ordering::SeqCst), after);
}

#[test]
fn refused_cancel_lets_the_run_finish() {
    let rt = runtime();
    let counter = Arc::new(AtomicUsize::new(0));
    let tx = counting(Arc::clone(&counter), 20).action(CapSet::new());
    tx.hooks()
        .add(HookId::CANCEL_REQUEST, Callback::respond("busy", |_| RequestResponse::No))
        .unwrap();
    tx.start(&rt).unwrap();
    assert!(!tx.request_cancel());
    assert_eq!(tx.wait(), TxResult::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

#[test]
fn pause_holds_and_resume_completes() {
    let rt = runtime();
    let counter = Arc::new(AtomicUsize::new(0));
    let tx = counting(Arc::clone(&counter), 200).action(CapSet::new());
    tx.start(&rt).unwrap();
    assert!(wait_until(Duration::from_secs(5), || counter.load(Ordering::SeqCst) > 0));
    assert!(tx.request_pause());
    assert!(wait_until(Duration::from_secs(5), || tx.status() == TxStatus::Paused));

    let held = counter.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.load(Ordering::SeqCst), held);
    assert!(held < 200);

    assert!(tx.request_resume());
    assert_eq!(tx.wait(), TxResult::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 200);
}

#[test]
fn runtime_opened_from_a_config_directory() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::open(dir.path()).unwrap();
    assert!(dir.path().join("nirva.toml").exists());
    let tx = adder().action(CapSet::new());
    tx.set_input("a", 20).unwrap();
    tx.set_input("b", 22).unwrap();
    assert_eq!(tx.execute(&rt), TxResult::Success);
    assert_eq!(tx.attrs().get_int("out").unwrap(), 42);
    rt.shutdown();
    assert!(!rt.is_open());
}
