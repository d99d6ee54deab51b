use parking_lot::{Condvar, Mutex};

/// A reusable (cyclic) barrier.
///
/// All parties block in [`arrive_and_wait`](Self::arrive_and_wait) until
/// the last one arrives, at which point the whole generation is released
/// and the barrier resets for the next round.
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    state: Mutex<State>,
    generation_changed: Condvar,
}

#[derive(Debug)]
struct State {
    arrived: usize,
    generation: u64,
}

impl Barrier {
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "Barrier party count must be positive");
        Self {
            parties,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
            }),
            generation_changed: Condvar::new(),
        }
    }

    /// Arrives at the barrier and blocks until all parties of the current
    /// generation have arrived.
    pub fn arrive_and_wait(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;

        state.arrived += 1;
        if state.arrived == self.parties {
            // Last arrival: advance the generation, reset for the next
            // round, release everyone.
            state.generation += 1;
            state.arrived = 0;
            drop(state);
            self.generation_changed.notify_all();
        } else {
            // The generation check guards against both spurious wake-ups
            // and wake-ups meant for a later generation.
            while state.generation == generation {
                self.generation_changed.wait(&mut state);
            }
        }
    }
}
