use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::runtime::join::wrap_task;
use crate::runtime::{JoinHandle, Spawn, Task};
use crate::sync::BlockingQueue;

/// The basic pool: a single shared FIFO queue and N workers blocking on it.
///
/// The degenerate cousin of [`WorkStealingPool`](crate::WorkStealingPool):
/// no per-worker deques, no stealing, strict submission order. Unlike the
/// work-stealing pool it drains tasks already queued when shutdown begins,
/// because its workers only exit on the queue's stopped signal.
pub struct ThreadPool {
    queue: Arc<BlockingQueue<Task>>,
    stop: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Starts a pool with `num_threads` workers; zero is coerced to one.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let queue = Arc::new(BlockingQueue::<Task>::new());

        let workers = (0..num_threads)
            .map(|index| {
                let queue = Arc::clone(&queue);
                thread::Builder::new()
                    .name(format!("threadflow-pool-{index}"))
                    .spawn(move || {
                        debug!(index, "pool worker started");
                        // A failed pop means stopped-and-empty; anything
                        // still queued at shutdown gets executed first.
                        while let Ok(task) = queue.pop() {
                            task();
                        }
                        debug!(index, "pool worker exiting");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            queue,
            stop: AtomicBool::new(false),
            workers: Mutex::new(workers),
        }
    }

    /// Queues a closure and returns the handle to its outcome. After
    /// [`shutdown`](Self::shutdown) the task is dropped instead and the
    /// handle reports a stopped [`JoinError`](crate::JoinError).
    pub fn submit<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = wrap_task(f);
        self.execute(task);
        handle
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stops the queue and joins the workers after they drain it.
    /// Idempotent; also invoked by `Drop`.
    pub fn shutdown(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.queue.stop();
            let workers = mem::take(&mut *self.workers.lock());
            for worker in workers {
                let _ = worker.join();
            }
        }
    }
}

impl Spawn for ThreadPool {
    fn execute(&self, task: Task) {
        if self.stop.load(Ordering::Acquire) {
            warn!("task submitted to a stopped pool; dropping");
            drop(task);
            return;
        }
        self.queue.push(task);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
