//! Worker pool for merge fan-out.
//!
//! A fixed set of worker threads drains a bounded FIFO queue. Partition merges
//! hand one job per delta sub-index to an [`Executor`] and wait for all of
//! them with [`fan_out`].

use parking_lot::{Condvar, Mutex};
use sift_core::{SiftError, SiftResult};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, warn};

/// A unit of work accepted by an [`Executor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named, fallible unit of work for [`fan_out`]
pub type NamedTask = (String, Box<dyn FnOnce() -> SiftResult<()> + Send + 'static>);

/// Something that runs jobs, possibly on other threads.
pub trait Executor: Send + Sync {
    /// Schedule a job. A rejected job is handed back to the caller.
    fn execute(&self, job: Job) -> Result<(), Job>;
}

/// Runs every job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> Result<(), Job> {
        job();
        Ok(())
    }
}

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    max_queue_depth: usize,
}

/// Fixed-size FIFO worker pool.
///
/// [`Executor::execute`] hands a job back when the queue is at
/// `max_queue_depth` or the pool is shut down.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `num_threads` workers named `sift-merge-0`, `sift-merge-1`, ...
    pub fn new(num_threads: usize, max_queue_depth: usize) -> SiftResult<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            max_queue_depth,
        });

        let pool = Self {
            inner: Arc::clone(&inner),
            workers: Mutex::new(Vec::with_capacity(num_threads)),
        };
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("sift-merge-{}", i))
                .spawn(move || worker_loop(&inner_clone));
            match handle {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(SiftError::Io(e));
                }
            }
        }
        Ok(pool)
    }

    /// Stop accepting jobs, let workers finish the queue, join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);

        // Hold the queue lock while notifying so no worker misses the wakeup
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), Job> {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Err(job);
        }
        if self.inner.queue_depth.load(AtomicOrdering::Acquire) >= self.inner.max_queue_depth {
            return Err(job);
        }

        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(job);
            self.inner.queue_depth.fetch_add(1, AtomicOrdering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, AtomicOrdering::Release);
                    break job;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        if let Err(e) = catch_unwind(AssertUnwindSafe(job)) {
            error!(target: "sift::pool", "pooled job panicked: {}", panic_message(&*e));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "(non-string panic)".to_string())
}

struct Latch {
    pending: usize,
    failures: Vec<(usize, String, SiftError)>,
}

/// Run every task on `executor` and wait for all of them.
///
/// Nothing is cancelled early: a failing task does not stop its siblings.
/// Tasks the executor rejects run on the calling thread. The first failure,
/// in submission order, is returned wrapped as `MergeFailed` with the task's
/// name; the rest are logged.
pub fn fan_out(executor: &dyn Executor, tasks: Vec<NamedTask>) -> SiftResult<()> {
    let latch = Arc::new((
        Mutex::new(Latch {
            pending: tasks.len(),
            failures: Vec::new(),
        }),
        Condvar::new(),
    ));

    for (order, (name, task)) in tasks.into_iter().enumerate() {
        let latch = Arc::clone(&latch);
        let job: Job = Box::new(move || {
            let result = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(payload) => Err(SiftError::Panicked(panic_message(&*payload))),
            };
            let (state, done) = &*latch;
            let mut state = state.lock();
            if let Err(e) = result {
                state.failures.push((order, name, e));
            }
            state.pending -= 1;
            if state.pending == 0 {
                done.notify_all();
            }
        });
        if let Err(rejected) = executor.execute(job) {
            rejected();
        }
    }

    let (state, done) = &*latch;
    let mut state = state.lock();
    while state.pending > 0 {
        done.wait(&mut state);
    }
    state.failures.sort_by_key(|(order, _, _)| *order);
    let mut failures = std::mem::take(&mut state.failures).into_iter();
    match failures.next() {
        None => Ok(()),
        Some((_, first, source)) => {
            for (_, name, e) in failures {
                warn!(target: "sift::pool", task = %name, "additional task failure: {}", e);
            }
            Err(SiftError::merge_failed(first, source))
        }
    }
}
