use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::runtime::builder::{Builder, PoolConfig};
use crate::runtime::join::wrap_task;
use crate::runtime::stealing::context::{self, WorkerId};
use crate::runtime::stealing::deque::WorkStealingDeque;
use crate::runtime::stealing::worker;
use crate::runtime::{JoinHandle, Spawn, Task};
use crate::sync::BlockingQueue;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// State shared between the pool handle and its worker threads.
pub(super) struct Shared {
    pub(super) id: u64,
    pub(super) cfg: PoolConfig,

    /// One deque per worker, indexed by worker index.
    pub(super) deques: Vec<WorkStealingDeque>,

    /// Overflow queue for submissions from non-worker threads. Its stop
    /// signal doubles as the shutdown wake-up for workers blocked on it.
    pub(super) global: BlockingQueue<Task>,

    pub(super) stop: AtomicBool,

    /// Number of workers currently inside a timed park.
    pub(super) parked: AtomicUsize,

    park_lock: Mutex<()>,
    park_cond: Condvar,
}

impl Shared {
    /// Routes a task: a worker of *this* pool pushes onto its own deque
    /// (children of a running task get recursive LIFO semantics), anyone
    /// else goes through the global queue.
    pub(super) fn submit_task(&self, task: Task) {
        if self.stop.load(Ordering::Acquire) {
            warn!(pool = self.id, "task submitted after shutdown; dropping");
            drop(task);
            return;
        }

        match context::worker_index_in(self.id) {
            Some(index) => self.deques[index].push(task),
            None => self.global.push(task),
        }
        self.wake_one();
    }

    /// Wakes at most one parked worker, and only when somebody is parked.
    /// The relaxed load can miss a worker mid-transition into the park;
    /// the parker's wait timeout bounds that miss.
    fn wake_one(&self) {
        if self.parked.load(Ordering::Relaxed) > 0 {
            self.park_cond.notify_one();
        }
    }

    /// Timed park at the bottom of the worker loop. Never waits once the
    /// stop flag is up, and never waits longer than the configured
    /// timeout.
    pub(super) fn park(&self) {
        // Release pairs with submitters' notify decision: once this store
        // is visible, wake_one sees a non-zero parked count.
        self.parked.fetch_add(1, Ordering::Release);
        {
            let mut guard = self.park_lock.lock();
            if !self.stop.load(Ordering::Acquire) {
                let _ = self
                    .park_cond
                    .wait_for(&mut guard, self.cfg.park_timeout);
            }
        }
        self.parked.fetch_sub(1, Ordering::Release);
    }

    /// Shutdown-side wake-up of every parked worker. Taking the park lock
    /// first closes the window between a worker's stop check and its wait.
    fn wake_all(&self) {
        let _guard = self.park_lock.lock();
        self.park_cond.notify_all();
    }
}

/// A work-stealing pool for CPU-bound tasks.
///
/// `N` workers each own a deque; tasks submitted from a worker thread go
/// to the head of its own deque (LIFO), tasks from external threads go to
/// a global FIFO queue. Idle workers steal from the tails of other deques
/// and back off through a yield-then-park cycle when the whole pool runs
/// dry.
///
/// Dropping the pool (or calling [`shutdown`](Self::shutdown)) stops the
/// workers *without* draining: in-flight tasks finish, still-queued tasks
/// are dropped and their handles resolve to a stopped
/// [`JoinError`](crate::JoinError). Callers that need
/// every submission to run must synchronize before dropping the pool,
/// e.g. with a [`Latch`](crate::sync::Latch) counting expected
/// completions, or by joining every handle.
pub struct WorkStealingPool {
    pub(super) shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkStealingPool {
    /// Starts a pool with `num_threads` workers; zero is coerced to one.
    pub fn new(num_threads: usize) -> Self {
        Builder::new().worker_threads(num_threads).build()
    }

    pub(crate) fn with_config(cfg: PoolConfig) -> Self {
        let num_workers = cfg.worker_threads;
        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            cfg,
            deques: (0..num_workers).map(|_| WorkStealingDeque::new()).collect(),
            global: BlockingQueue::new(),
            stop: AtomicBool::new(false),
            parked: AtomicUsize::new(0),
            park_lock: Mutex::new(()),
            park_cond: Condvar::new(),
        });

        let workers = (0..num_workers)
            .map(|index| spawn_worker(&shared, index))
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submits a closure and returns the handle to its outcome.
    ///
    /// The closure runs exactly once on some worker; a panic inside it is
    /// captured into the handle and the worker moves on. After shutdown
    /// the task never runs and the handle reports a stopped
    /// [`JoinError`](crate::JoinError).
    pub fn submit<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = wrap_task(f);
        self.shared.submit_task(task);
        handle
    }

    pub fn worker_count(&self) -> usize {
        self.shared.deques.len()
    }

    /// Stops the pool: raises the stop flag, wakes everything, joins the
    /// workers and drops whatever never reached one. Idempotent; also
    /// invoked by `Drop`.
    pub fn shutdown(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            self.shared.global.stop();
            self.shared.wake_all();

            let workers = mem::take(&mut *self.workers.lock());
            for handle in workers {
                let _ = handle.join();
            }

            // Drop leftovers now rather than at pool drop, so pending
            // handles resolve as soon as shutdown returns.
            for deque in &self.shared.deques {
                while deque.pop().is_some() {}
            }
            while self.shared.global.try_pop().is_some() {}
        }
    }
}

impl Spawn for WorkStealingPool {
    fn execute(&self, task: Task) {
        self.shared.submit_task(task);
    }
}

impl Drop for WorkStealingPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<Shared>, index: usize) -> thread::JoinHandle<()> {
    let mut builder = thread::Builder::new().name((shared.cfg.thread_name)());
    if let Some(stack_size) = shared.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    let shared = Arc::clone(shared);
    builder
        .spawn(move || {
            // Bind before anything else: routing relies on the slot being
            // set before this thread executes its first task.
            context::bind_worker(WorkerId {
                pool: shared.id,
                index,
            });
            debug!(pool = shared.id, index, "worker started");
            worker::run(&shared, index);
            debug!(pool = shared.id, index, "worker exiting");
        })
        .expect("failed to spawn worker thread")
}
