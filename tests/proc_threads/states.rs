//! State mask observed across real runs

use super::common::*;
use nirva::{Callback, HookId, PoolConfig, ProcThread, ThreadAttrs, ThreadPool, ThreadState};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn pool() -> ThreadPool {
    init_tracing();
    ThreadPool::new(PoolConfig {
        min_threads: 2,
        max_threads: 4,
        max_queue_depth: 64,
    })
    .unwrap()
}

/// Snapshot the state at every lifecycle edge the thread fires
fn snapshot_edges(pt: &ProcThread<i32>) -> Arc<Mutex<Vec<ThreadState>>> {
    let seen = Arc::new(Mutex::new(vec![pt.state()]));
    for hook in [
        HookId::PREPARING,
        HookId::TX_START,
        HookId::PAUSED,
        HookId::RESUMING,
        HookId::COMPLETED,
        HookId::CANCELLED,
        HookId::FINISHED,
    ] {
        let s = Arc::clone(&seen);
        let me = pt.clone();
        pt.hooks()
            .add(
                hook,
                Callback::check("snapshot", move |_| {
                    s.lock().push(me.state());
                    true
                }),
            )
            .unwrap();
    }
    seen
}

fn assert_settled(st: ThreadState) {
    assert!(st.contains(ThreadState::FINISHED));
    assert!(!st.intersects(ThreadState::TRANSIENT));
    assert_eq!((st & ThreadState::OUTCOMES).bits().count_ones(), 1);
}

#[test]
fn test_rank_never_decreases_over_a_run() {
    let pool = pool();
    let pt: ProcThread<i32> = ProcThread::builder()
        .pausable(true)
        .body(|ctx| {
            for _ in 0..50 {
                ctx.sync_point()?;
                std::thread::sleep(Duration::from_micros(200));
            }
            Ok(1)
        })
        .build();
    let seen = snapshot_edges(&pt);
    pt.queue(&pool).unwrap();
    if pt.request_pause() {
        wait_until(Duration::from_secs(2), || {
            pt.state().contains(ThreadState::PAUSED) || pt.state().is_done()
        });
        pt.request_resume();
    }
    assert_eq!(pt.join(), Ok(1));
    pool.drain();

    let seen = seen.lock();
    assert!(seen.len() >= 4);
    for pair in seen.windows(2) {
        assert!(
            pair[1].rank() >= pair[0].rank(),
            "rank went back from {:?} to {:?}",
            pair[0],
            pair[1]
        );
    }
    assert_settled(pt.state());
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Pause,
    Resume,
    Cancel,
    Nap,
}

fn request() -> impl Strategy<Value = Request> {
    prop_oneof![
        Just(Request::Pause),
        Just(Request::Resume),
        Just(Request::Cancel),
        Just(Request::Nap),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_requests_always_settle(requests in prop::collection::vec(request(), 0..12)) {
        let pool = pool();
        let pt: ProcThread<i32> = ProcThread::builder()
            .attrs(ThreadAttrs::NOTE_STTIME)
            .pausable(true)
            .body(|ctx| {
                for _ in 0..20 {
                    ctx.sync_point()?;
                    std::thread::sleep(Duration::from_micros(100));
                }
                Ok(20)
            })
            .build();
        pt.queue(&pool).unwrap();
        for r in requests {
            match r {
                Request::Pause => { pt.request_pause(); }
                Request::Resume => { pt.request_resume(); }
                Request::Cancel => { pt.request_cancel(); }
                Request::Nap => std::thread::sleep(Duration::from_micros(300)),
            }
        }
        // Anything left paused is released so the body can reach its end
        while !pt.wait_done(Some(Duration::from_millis(20))) {
            pt.request_resume();
        }
        let st = pt.state();
        prop_assert!(st.contains(ThreadState::FINISHED));
        prop_assert!(!st.intersects(ThreadState::TRANSIENT));
        let outcome = st & ThreadState::OUTCOMES;
        prop_assert!(outcome == ThreadState::COMPLETED || outcome == ThreadState::CANCELLED);
        match pt.join() {
            Ok(v) => prop_assert_eq!(v, 20),
            Err(e) => prop_assert_eq!(e, nirva::ThreadError::Cancelled),
        }
        prop_assert!(pt.finished_at().is_some());
    }
}
