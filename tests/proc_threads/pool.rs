//! Thread pool behaviour seen through proc threads

use super::common::*;
use nirva::{
    Callback, HookId, PoolConfig, ProcThread, ThreadAttrs, ThreadError, ThreadPool, ThreadState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn small_pool() -> ThreadPool {
    init_tracing();
    ThreadPool::new(PoolConfig {
        min_threads: 2,
        max_threads: 4,
        max_queue_depth: 256,
    })
    .unwrap()
}

#[test]
fn test_many_threads_all_complete() {
    let pool = small_pool();
    let threads: Vec<ProcThread<usize>> = (0..64)
        .map(|i| ProcThread::create(ThreadAttrs::empty(), move |_| Ok(i * 2)))
        .collect();
    for pt in &threads {
        pt.queue(&pool).unwrap();
    }
    let total: usize = threads.iter().map(|pt| pt.join().unwrap()).sum();
    assert_eq!(total, (0..64).map(|i| i * 2).sum::<usize>());

    pool.drain();
    let stats = pool.stats();
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.active_tasks, 0);
    assert!(stats.tasks_completed >= 64);
    assert!(stats.worker_count >= 2 && stats.worker_count <= 4);
}

#[test]
fn test_priority_thread_jumps_the_queue() {
    let pool = ThreadPool::new(PoolConfig {
        min_threads: 1,
        max_threads: 1,
        max_queue_depth: 64,
    })
    .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    // Hold the single worker until everything is queued
    let gate = Arc::new(Barrier::new(2));
    let g = Arc::clone(&gate);
    let blocker = ProcThread::create(ThreadAttrs::WAIT_START, move |_| {
        g.wait();
        Ok(0)
    });
    blocker.queue(&pool).unwrap();

    let mut threads = Vec::new();
    for (i, attrs) in [
        (1, ThreadAttrs::empty()),
        (2, ThreadAttrs::empty()),
        (3, ThreadAttrs::PRIORITY),
    ] {
        let o = Arc::clone(&order);
        let pt = ProcThread::create(attrs, move |_| {
            o.lock().push(i);
            Ok(i)
        });
        pt.queue(&pool).unwrap();
        threads.push(pt);
    }
    gate.wait();
    for pt in &threads {
        pt.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![3, 1, 2]);
}

#[test]
fn test_wait_start_returns_once_running() {
    let pool = small_pool();
    let release = Arc::new(Barrier::new(2));
    let r = Arc::clone(&release);
    let pt = ProcThread::create(ThreadAttrs::WAIT_START, move |_| {
        r.wait();
        Ok(1)
    });
    pt.queue(&pool).unwrap();
    assert!(pt.state().rank() >= ThreadState::RUNNING.rank());
    release.wait();
    assert_eq!(pt.join(), Ok(1));
}

#[test]
fn test_queue_after_shutdown_fails_the_thread() {
    let pool = small_pool();
    pool.shutdown();
    assert!(pool.is_shut_down());
    assert_eq!(pool.worker_count(), 0);

    let pt: ProcThread<i32> = ProcThread::create(ThreadAttrs::empty(), |_| Ok(1));
    assert_eq!(pt.queue(&pool), Err(ThreadError::PoolShutdown));
    assert_eq!(pt.join(), Err(ThreadError::PoolShutdown));
    assert!(pt.state().contains(ThreadState::FINISHED));
}

#[test]
fn test_foreground_thread_skips_the_pool() {
    let pool = small_pool();
    let before = pool.stats().tasks_completed;
    let caller = std::thread::current().id();
    let pt = ProcThread::create(ThreadAttrs::FG_THREAD, move |_| {
        Ok(std::thread::current().id() == caller)
    });
    pt.queue(&pool).unwrap();
    assert!(pt.wait_done(Some(Duration::from_millis(1))));
    assert_eq!(pt.join(), Ok(true));
    assert_eq!(pool.stats().tasks_completed, before);
}

#[test]
fn test_autodelete_threads_destroyed_after_drain() {
    let pool = small_pool();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let threads: Vec<ProcThread<i32>> = (0..8)
        .map(|_| ProcThread::create(ThreadAttrs::AUTODELETE, |_| Ok(1)))
        .collect();
    for pt in &threads {
        let d = Arc::clone(&destroyed);
        pt.hooks()
            .add(
                HookId::DESTRUCTION,
                Callback::check("gone", move |_| {
                    d.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            )
            .unwrap();
        pt.queue(&pool).unwrap();
    }
    pool.drain();
    assert_eq!(destroyed.load(Ordering::SeqCst), 8);
    assert!(threads.iter().all(|pt| pt.is_destroyed()));
}
