use std::cell::Cell;

/// Identity of the current thread within a specific pool.
///
/// The pool id disambiguates between pool instances: a worker of pool A
/// submitting into pool B must classify as external to B, never be routed
/// into B's deque at its A-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerId {
    pub(crate) pool: u64,
    pub(crate) index: usize,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Binds the current thread to a pool worker slot. Called exactly once, on
/// worker start, before the thread runs any task.
pub(crate) fn bind_worker(id: WorkerId) {
    CURRENT_WORKER.with(|slot| {
        debug_assert!(
            slot.get().is_none(),
            "thread is already a worker of another pool"
        );
        slot.set(Some(id));
    });
}

/// The current thread's worker index in the given pool, or `None` when the
/// thread is external to it (including workers of other pools).
pub(crate) fn worker_index_in(pool: u64) -> Option<usize> {
    CURRENT_WORKER.with(|slot| {
        slot.get()
            .filter(|id| id.pool == pool)
            .map(|id| id.index)
    })
}
