use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::runtime::Task;

/// A per-worker double-ended task queue: LIFO for the owning worker, FIFO
/// for thieves.
///
/// One plain mutex per deque instead of a lock-free Chase-Lev deque: the
/// deques are independent, so stealing across *different* workers still
/// proceeds in parallel, and the owner/thief tie at a single remaining
/// task degrades to whoever takes the lock first.
pub(crate) struct WorkStealingDeque {
    inner: Mutex<VecDeque<Task>>,
}

impl WorkStealingDeque {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Owner only: push at the head.
    pub(crate) fn push(&self, task: Task) {
        self.inner.lock().push_front(task);
    }

    /// Owner only: pop from the head (LIFO).
    pub(crate) fn pop(&self) -> Option<Task> {
        self.inner.lock().pop_front()
    }

    /// Any thread: take from the tail (FIFO).
    pub(crate) fn steal(&self) -> Option<Task> {
        self.inner.lock().pop_back()
    }

    /// Advisory only: not authoritative under concurrent mutation.
    #[allow(dead_code)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
