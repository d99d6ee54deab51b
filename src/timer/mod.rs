//! Delayed and periodic task execution.
//!
//! A [`Scheduler`] owns one dispatch thread and a min-heap of timed
//! entries. When an entry comes due the dispatch thread hands its task to
//! the pool; the dispatch thread itself never runs user code.

use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::runtime::{Spawn, Task};

type TimerFn = Arc<dyn Fn() + Send + Sync + 'static>;

struct TimerEntry {
    due: Instant,
    /// Zero means one-shot.
    interval: Duration,
    task: TimerFn,
}

// BinaryHeap is a max-heap; order entries by reversed due time to get the
// earliest deadline on top. Ties are broken arbitrarily.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        other.due.cmp(&self.due)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for TimerEntry {}

struct TimerShared {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    /// Signaled on every insertion and on stop; the dispatch thread may be
    /// sleeping towards a later deadline than the entry just added.
    changed: Condvar,
    stop: AtomicBool,
    pool: Arc<dyn Spawn>,
}

/// Executes tasks at absolute times, after delays, or periodically, by
/// dispatching them into a pool when they come due.
///
/// Dropping the scheduler stops the dispatch thread and joins it. Tasks
/// already handed to the pool are not recalled; fires that were still
/// pending are suppressed.
pub struct Scheduler {
    shared: Arc<TimerShared>,
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// Starts a scheduler dispatching into `pool`. The pool is kept alive
    /// for at least as long as the scheduler.
    pub fn new<P>(pool: Arc<P>) -> Self
    where
        P: Spawn + 'static,
    {
        let shared = Arc::new(TimerShared {
            heap: Mutex::new(BinaryHeap::new()),
            changed: Condvar::new(),
            stop: AtomicBool::new(false),
            pool: pool as Arc<dyn Spawn>,
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("threadflow-timer".to_string())
                .spawn(move || dispatch_loop(&shared))
                .expect("failed to spawn dispatch thread")
        };

        Self {
            shared,
            dispatcher: Some(dispatcher),
        }
    }

    /// Runs `task` once at the absolute time `due`. A time already in the
    /// past fires on the next dispatch pass.
    pub fn schedule_at<F>(&self, due: Instant, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(TimerEntry {
            due,
            interval: Duration::ZERO,
            task: Arc::new(task),
        });
    }

    /// Runs `task` once, `delay` from now.
    pub fn schedule_after<F>(&self, delay: Duration, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_at(Instant::now() + delay, task);
    }

    /// Runs `task` at `first` and then every `interval`.
    ///
    /// A zero interval is refused outright: it would re-fire without
    /// pause. The cadence is a fixed stride from the previous due time,
    /// not from the actual execution time: a delayed dispatch catches up
    /// in a burst instead of drifting.
    pub fn schedule_periodic<F>(&self, first: Instant, interval: Duration, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() {
            debug!("refusing periodic schedule with zero interval");
            return;
        }
        self.insert(TimerEntry {
            due: first,
            interval,
            task: Arc::new(task),
        });
    }

    fn insert(&self, entry: TimerEntry) {
        self.shared.heap.lock().push(entry);
        self.shared.changed.notify_one();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            // Taking the heap lock closes the window between the dispatch
            // thread's stop check and its wait; without it the notify can
            // land in that window and be lost forever.
            let _heap = self.shared.heap.lock();
            self.shared.changed.notify_one();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

fn dispatch_loop(shared: &TimerShared) {
    loop {
        let mut heap = shared.heap.lock();

        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        // Sleep until there is something due: indefinitely while the heap
        // is empty, otherwise up to the earliest deadline. Insertions and
        // stop both notify, so waking early just re-evaluates.
        match heap.peek().map(|entry| entry.due) {
            None => {
                shared.changed.wait(&mut heap);
            }
            Some(next) => {
                if next > Instant::now() {
                    let _ = shared.changed.wait_until(&mut heap, next);
                }
            }
        }

        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        // Dispatch everything that has come due. The heap lock is released
        // around the pool hand-off: submission can block on the pool's
        // wake-up plumbing and must not freeze schedule_* callers.
        while heap
            .peek()
            .map_or(false, |entry| entry.due <= Instant::now())
        {
            let Some(mut entry) = heap.pop() else { break };

            let task = Arc::clone(&entry.task);
            MutexGuard::unlocked(&mut heap, || {
                let job: Task = Box::new(move || task());
                shared.pool.execute(job);
            });

            // Periodic entries go back in with a fixed stride from their
            // previous due time.
            if !entry.interval.is_zero() {
                entry.due += entry.interval;
                heap.push(entry);
            }
        }
    }
}
