use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// The queue (or the pool feeding from it) has been stopped.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stopped")]
pub struct Stopped;

/// An unbounded MPMC FIFO queue with a stop signal.
///
/// `pop` blocks while the queue is empty; after [`stop`](Self::stop) it
/// keeps draining whatever is left and only then reports [`Stopped`] to
/// every current and future consumer.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer. Never blocks.
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            inner.items.push_back(item);
        }
        // Notify after unlocking so the woken consumer does not immediately
        // contend on the mutex we still hold.
        self.available.notify_one();
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns [`Stopped`] once the queue is both stopped and empty.
    pub fn pop(&self) -> Result<T, Stopped> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.stopped {
                return Err(Stopped);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Removes the oldest item without blocking; `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Stops the queue and wakes every waiter. Idempotent.
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            inner.stopped = true;
        }
        self.available.notify_all();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
