use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            permits: Mutex::new(initial),
            released: Condvar::new(),
        }
    }

    /// Returns a permit and wakes one waiter.
    pub fn release(&self) {
        {
            let mut permits = self.permits.lock();
            *permits += 1;
        }
        self.released.notify_one();
    }

    /// Takes a permit, blocking while none are available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.released.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Takes a permit if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }
}
