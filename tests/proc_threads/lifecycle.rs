//! Lifecycle edges, requests and waits of proc threads

use super::common::*;
use nirva::{
    Callback, HookDispatcher, HookId, PoolConfig, ProcThread, RequestResponse, Step, ThreadAttrs,
    ThreadConfig, ThreadError, ThreadPool, ThreadSlot, ThreadState, Uid,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
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

fn record(hooks: &HookDispatcher, log: &Arc<Mutex<Vec<HookId>>>, ids: &[HookId]) {
    for &id in ids {
        let l = Arc::clone(log);
        hooks
            .add(
                id,
                Callback::check("log", move |ev| {
                    l.lock().push(ev.hook);
                    true
                }),
            )
            .unwrap();
    }
}

fn state_reached(pt: &ProcThread<i32>, bits: ThreadState) -> bool {
    wait_until(Duration::from_secs(5), || pt.state().contains(bits))
}

#[test]
fn test_success_fires_edges_in_order() {
    let pool = pool();
    let pt = ProcThread::create(ThreadAttrs::NOTE_STTIME, |_| Ok(11));
    let log = Arc::new(Mutex::new(Vec::new()));
    record(
        pt.hooks(),
        &log,
        &[
            HookId::PREPARING,
            HookId::TX_START,
            HookId::COMPLETED,
            HookId::FINISHED,
            HookId::THREAD_EXIT,
        ],
    );
    pt.queue(&pool).unwrap();
    assert_eq!(pt.join(), Ok(11));
    pool.drain();
    assert_eq!(
        *log.lock(),
        vec![
            HookId::PREPARING,
            HookId::TX_START,
            HookId::COMPLETED,
            HookId::FINISHED,
            HookId::THREAD_EXIT,
        ]
    );
    let (start, end) = (pt.started_at().unwrap(), pt.finished_at().unwrap());
    assert!(start <= end);
}

#[test]
fn test_inherited_hooks_reach_parent() {
    let pool = pool();
    let parent = Arc::new(HookDispatcher::new(Uid::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    record(&parent, &log, &[HookId::TX_START, HookId::FINISHED]);

    let pt: ProcThread<i32> = ProcThread::builder()
        .inherit_hooks(Arc::clone(&parent))
        .body(|_| Ok(1))
        .build();
    assert!(pt.attrs().contains(ThreadAttrs::INHERIT_HOOKS));
    pt.queue(&pool).unwrap();
    pt.join().unwrap();
    pool.drain();
    assert_eq!(*log.lock(), vec![HookId::TX_START, HookId::FINISHED]);
}

#[test]
fn test_parent_can_refuse_cancel() {
    let parent = Arc::new(HookDispatcher::new(Uid::new()));
    parent
        .add(
            HookId::CANCEL_REQUEST,
            Callback::respond("keep", |_| RequestResponse::No),
        )
        .unwrap();
    let pt: ProcThread<i32> = ProcThread::builder()
        .inherit_hooks(parent)
        .body(|_| Ok(1))
        .build();
    assert!(!pt.request_cancel());
    assert!(!pt.state().contains(ThreadState::CANCEL_REQUESTED));
}

#[test]
fn test_cancel_before_queue_skips_body() {
    let pool = pool();
    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);
    let pt = ProcThread::create(ThreadAttrs::empty(), move |_| {
        r.store(true, Ordering::SeqCst);
        Ok(1)
    });
    assert!(pt.request_cancel());
    pt.queue(&pool).unwrap();
    assert_eq!(pt.join(), Err(ThreadError::Cancelled));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(pt.state().contains(ThreadState::CANCELLED));
}

#[test]
fn test_cancel_while_paused() {
    let pool = pool();
    let pt: ProcThread<i32> = ProcThread::builder()
        .pausable(true)
        .body(|ctx| loop {
            ctx.sync_point()?;
            std::thread::sleep(Duration::from_millis(1));
        })
        .build();
    pt.queue(&pool).unwrap();
    assert!(state_reached(&pt, ThreadState::RUNNING));
    assert!(pt.request_pause());
    assert!(state_reached(&pt, ThreadState::PAUSED));

    assert!(pt.request_cancel());
    assert_eq!(pt.join(), Err(ThreadError::Cancelled));
    let st = pt.state();
    assert!(st.contains(ThreadState::CANCELLED | ThreadState::FINISHED));
    assert!(!st.contains(ThreadState::PAUSED));
}

#[test]
fn test_resume_before_pause_taken_clears_request() {
    let pt: ProcThread<i32> = ProcThread::builder().pausable(true).body(|_| Ok(1)).build();
    assert!(pt.request_pause());
    assert!(pt.state().contains(ThreadState::PAUSE_REQUESTED));
    assert!(pt.request_resume());
    assert!(!pt.state().intersects(ThreadState::PAUSE_REQUESTED | ThreadState::PAUSED));
}

#[test]
fn test_hard_wait_cancelled() {
    let pool = pool();
    let pt = ProcThread::create(ThreadAttrs::WAIT_SYNC, |_| Ok(1));
    pt.queue(&pool).unwrap();
    assert!(state_reached(&pt, ThreadState::WAITING));
    assert!(pt.request_cancel());
    assert_eq!(pt.join(), Err(ThreadError::Cancelled));
}

#[test]
fn test_sync_ready_before_queue_runs_straight_through() {
    let pool = pool();
    let pt = ProcThread::create(ThreadAttrs::WAIT_SYNC, |_| Ok(6));
    pt.sync_ready();
    pt.queue(&pool).unwrap();
    assert_eq!(pt.join(), Ok(6));
}

#[test]
fn test_soft_wait_condition_released_by_another_thread() {
    let pool = pool();
    let ready = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ready);
    let pt = ProcThread::builder()
        .config(ThreadConfig {
            blocked_limit: Duration::from_millis(5),
            ..ThreadConfig::default()
        })
        .body(|ctx| {
            ctx.wait_loop(Some(Duration::from_secs(5)))?;
            Ok(8)
        })
        .build();
    pt.hooks()
        .add(
            HookId::SYNC_WAIT,
            Callback::check("ready", move |_| r.load(Ordering::SeqCst)),
        )
        .unwrap();
    let waiting = Arc::new(AtomicUsize::new(0));
    let w = Arc::clone(&waiting);
    pt.hooks()
        .add(
            HookId::TX_WAITING,
            Callback::check("waiting", move |_| {
                w.fetch_add(1, Ordering::SeqCst);
                true
            }),
        )
        .unwrap();

    pt.queue(&pool).unwrap();
    assert!(state_reached(&pt, ThreadState::BLOCKED));
    assert!(pt.state().contains(ThreadState::WAITING));
    ready.store(true, Ordering::SeqCst);
    assert_eq!(pt.join(), Ok(8));
    assert!(!pt.state().intersects(ThreadState::BLOCKED | ThreadState::WAITING));
    assert_eq!(waiting.load(Ordering::SeqCst), 1);
}

#[test]
fn test_idle_function_runs_until_done() {
    let pool = pool();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    let pt = ProcThread::builder()
        .idle_body(move |_| {
            let n = r.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Ok(Step::Idle)
            } else {
                Ok(Step::Done(n as i32))
            }
        })
        .build();
    assert!(pt.attrs().contains(ThreadAttrs::IDLEFUNC));
    pt.queue(&pool).unwrap();
    for _ in 0..2 {
        assert!(pt.wait_done(Some(Duration::from_secs(5))));
        assert!(pt.state().contains(ThreadState::IDLING));
        pt.resubmit(&pool).unwrap();
    }
    assert_eq!(pt.join(), Ok(3));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_dontcare_after_finish_destroys_now() {
    let pool = pool();
    let pt = ProcThread::create(ThreadAttrs::empty(), |_| Ok(2));
    let slot: ThreadSlot<i32> = Arc::new(Mutex::new(Some(pt.clone())));
    pt.nullify_on_destroy(&slot);
    pt.queue(&pool).unwrap();
    assert_eq!(pt.join(), Ok(2));
    pool.drain();

    assert!(!pt.dontcare());
    assert!(pt.is_destroyed());
    assert!(slot.lock().is_none());

    // Registering a slot after destruction clears it at once
    let late: ThreadSlot<i32> = Arc::new(Mutex::new(Some(pt.clone())));
    pt.nullify_on_destroy(&late);
    assert!(late.lock().is_none());
}

#[test]
fn test_body_errors_map_to_outcome_bits() {
    let pool = pool();
    let cases: Vec<(ThreadError, ThreadState)> = vec![
        (ThreadError::failed("bad input"), ThreadState::ERROR),
        (ThreadError::TimedOut(5), ThreadState::TIMED_OUT),
        (ThreadError::Cancelled, ThreadState::CANCELLED),
    ];
    for (err, bit) in cases {
        let e = err.clone();
        let pt: ProcThread<i32> = ProcThread::create(ThreadAttrs::empty(), move |_| Err(e.clone()));
        pt.queue(&pool).unwrap();
        assert_eq!(pt.join(), Err(err));
        let st = pt.state();
        assert!(st.contains(bit | ThreadState::FINISHED));
        assert_eq!(st & ThreadState::OUTCOMES, bit);
    }

    let pt: ProcThread<i32> = ProcThread::create(ThreadAttrs::empty(), |_| panic!("decoder"));
    pt.queue(&pool).unwrap();
    assert!(matches!(pt.join(), Err(ThreadError::Signalled(_))));
    assert_eq!(pt.state() & ThreadState::OUTCOMES, ThreadState::SIGNALLED);
}
