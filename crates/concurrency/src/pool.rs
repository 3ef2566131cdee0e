//! Worker thread pool for proc threads
//!
//! A FIFO queue of boxed work items consumed by native worker threads.
//! Priority work is pushed to the consumed end. The pool starts with
//! `min_threads` workers and grows by one whenever the outstanding work
//! reaches the number of workers, up to `max_threads`.

use crate::error::{ThreadError, ThreadResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers started eagerly
    pub min_threads: usize,
    /// Upper bound on workers
    pub max_threads: usize,
    /// Queued items beyond which `submit` reports backpressure
    pub max_queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 8,
            max_threads: 64,
            max_queue_depth: 4096,
        }
    }
}

/// Pool metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Items waiting in the queue
    pub queue_depth: usize,
    /// Items currently executing
    pub active_tasks: usize,
    /// Items finished since the pool was created
    pub tasks_completed: u64,
    /// Live worker threads
    pub worker_count: usize,
}

type Work = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Work>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
    max_queue_depth: usize,
}

/// Thread pool consuming a shared work queue
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicUsize,
    max_threads: usize,
}

impl ThreadPool {
    /// Start a pool with `config.min_threads` workers
    ///
    /// Workers are named `nirva-pool-0`, `nirva-pool-1`, etc.
    ///
    /// # Errors
    ///
    /// `Failed` if not a single worker could be spawned.
    pub fn new(config: PoolConfig) -> ThreadResult<Self> {
        let pool = Self {
            inner: Arc::new(PoolInner {
                queue: Mutex::new(VecDeque::new()),
                work_ready: Condvar::new(),
                drain_cond: Condvar::new(),
                shutdown: AtomicBool::new(false),
                queue_depth: AtomicUsize::new(0),
                active_tasks: AtomicUsize::new(0),
                tasks_completed: AtomicU64::new(0),
                max_queue_depth: config.max_queue_depth,
            }),
            workers: Mutex::new(Vec::with_capacity(config.min_threads)),
            worker_count: AtomicUsize::new(0),
            max_threads: config.max_threads.max(config.min_threads).max(1),
        };
        let min = config.min_threads.max(1);
        for _ in 0..min {
            pool.spawn_worker(min)?;
        }
        debug!(target: "nirva::pool", workers = pool.worker_count(), max = pool.max_threads, "thread pool started");
        Ok(pool)
    }

    /// Spawn one worker unless `cap` workers already run
    ///
    /// The count is checked under the workers lock, so racing callers never
    /// take the pool past `cap`.
    fn spawn_worker(&self, cap: usize) -> ThreadResult<bool> {
        let mut workers = self.workers.lock();
        if workers.len() >= cap || self.inner.shutdown.load(Ordering::Acquire) {
            return Ok(false);
        }
        let i = workers.len();
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("nirva-pool-{}", i))
            .spawn(move || worker_loop(&inner))
            .map_err(ThreadError::failed)?;
        workers.push(handle);
        self.worker_count.fetch_add(1, Ordering::Release);
        Ok(true)
    }

    fn maybe_grow(&self) {
        let workers = self.worker_count.load(Ordering::Acquire);
        if workers >= self.max_threads {
            return;
        }
        let outstanding = self.inner.queue_depth.load(Ordering::Acquire)
            + self.inner.active_tasks.load(Ordering::Acquire);
        if outstanding >= workers {
            match self.spawn_worker(self.max_threads) {
                Ok(true) => {
                    debug!(target: "nirva::pool", workers = self.worker_count(), "thread pool grown")
                }
                Ok(false) => {}
                Err(e) => warn!(target: "nirva::pool", error = %e, "could not grow thread pool"),
            }
        }
    }


    /// Queue work at the back of the queue
    ///
    /// # Errors
    ///
    /// `PoolShutdown` after shutdown, `Backpressure` when the queue is full.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> ThreadResult<()> {
        self.push(Box::new(work), false)
    }

    /// Queue work at the consumed end of the queue
    pub fn submit_priority(&self, work: impl FnOnce() + Send + 'static) -> ThreadResult<()> {
        self.push(Box::new(work), true)
    }

    fn push(&self, work: Work, priority: bool) -> ThreadResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ThreadError::PoolShutdown);
        }
        if self.inner.queue_depth.load(Ordering::Acquire) >= self.inner.max_queue_depth {
            return Err(ThreadError::Backpressure);
        }
        self.maybe_grow();
        {
            let mut queue = self.inner.queue.lock();
            if priority {
                queue.push_front(work);
            } else {
                queue.push_back(work);
            }
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and running work has completed
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting work, let workers finish the queue, and join them
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            // Holding the queue lock means no worker sits between its shutdown
            // check and its wait.
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        self.worker_count.store(0, Ordering::Release);
        debug!(target: "nirva::pool", "thread pool shut down");
    }

    /// True once `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Live worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    /// Snapshot of pool metrics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.worker_count(),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters, also on panic
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let work = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(work) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break work;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
            error!(
                target: "nirva::pool",
                "pool task panicked: {}",
                panic_message(e.as_ref())
            );
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_threads: min,
            max_threads: max,
            max_queue_depth: 4096,
        }
    }

    #[test]
    fn test_submit_and_drain() {
        let pool = ThreadPool::new(config(2, 2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.stats().tasks_completed, 10);
        pool.shutdown();
    }

    #[test]
    fn test_fifo_with_priority_to_front() {
        let pool = ThreadPool::new(config(1, 1)).unwrap();

        // Block the single worker so the rest queue up
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let o = Arc::clone(&order);
            pool.submit(move || o.lock().push(name)).unwrap();
        }
        let o = Arc::clone(&order);
        pool.submit_priority(move || o.lock().push("urgent"))
            .unwrap();

        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec!["urgent", "first", "second"]);
        pool.shutdown();
    }

    #[test]
    fn test_grows_up_to_max() {
        let pool = ThreadPool::new(config(1, 3)).unwrap();
        let barrier = Arc::new(Barrier::new(4));
        for _ in 0..3 {
            let b = Arc::clone(&barrier);
            pool.submit(move || {
                b.wait();
            })
            .unwrap();
        }
        // All three tasks must be running at once for the barrier to open
        barrier.wait();
        pool.drain();
        assert_eq!(pool.worker_count(), 3);

        pool.submit(|| {}).unwrap();
        pool.drain();
        assert!(pool.worker_count() <= 3);
    }

    #[test]
    fn test_concurrent_submitters_respect_max() {
        let pool = Arc::new(ThreadPool::new(config(1, 3)).unwrap());
        let start = Arc::new(Barrier::new(8));
        let done = Arc::new(AtomicUsize::new(0));
        let submitters: Vec<_> = (0..8)
            .map(|_| {
                let (pool, start, done) = (Arc::clone(&pool), Arc::clone(&start), Arc::clone(&done));
                std::thread::spawn(move || {
                    start.wait();
                    for _ in 0..50 {
                        let d = Arc::clone(&done);
                        pool.submit(move || {
                            std::thread::sleep(Duration::from_micros(200));
                            d.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                        assert!(pool.worker_count() <= 3);
                    }
                })
            })
            .collect();
        for s in submitters {
            s.join().unwrap();
        }
        pool.drain();
        assert_eq!(done.load(Ordering::SeqCst), 400);
        let workers = pool.stats().worker_count;
        assert!((2..=3).contains(&workers));
        pool.shutdown();
    }

    #[test]
    fn test_backpressure() {
        let pool = ThreadPool::new(PoolConfig {
            min_threads: 1,
            max_threads: 1,
            max_queue_depth: 2,
        })
        .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(|| {}).unwrap();
        pool.submit(|| {}).unwrap();
        assert_eq!(pool.submit(|| {}), Err(ThreadError::Backpressure));

        barrier.wait();
        pool.drain();
        pool.shutdown();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(config(1, 1)).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown() {
        let pool = ThreadPool::new(config(1, 1)).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.submit(|| {}), Err(ThreadError::PoolShutdown));
        assert_eq!(pool.stats().worker_count, 0);
    }
}
