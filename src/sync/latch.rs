use parking_lot::{Condvar, Mutex};

/// A one-shot countdown rendezvous.
///
/// The latch opens when the count reaches zero and stays open permanently.
/// A latch constructed with count 0 is born open.
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    open: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            open: Condvar::new(),
        }
    }

    /// Decrements the count; the decrement that reaches zero releases all
    /// waiters. Calls past zero are no-ops.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                // Unlock before notifying so released waiters do not bounce
                // off the mutex we are still holding.
                drop(count);
                self.open.notify_all();
            }
        }
    }

    /// Blocks until the count reaches zero. Returns immediately if the
    /// latch is already open.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.open.wait(&mut count);
        }
    }
}
