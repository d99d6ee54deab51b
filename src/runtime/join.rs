use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::runtime::Task;

pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// Why a submitted task produced no value.
pub struct JoinError {
    repr: Repr,
}

enum Repr {
    // The payload is only Send; boxing it behind a lock makes the error
    // Sync so it composes with error-aggregating callers.
    Panicked(Mutex<PanicPayload>),
    Stopped,
}

impl JoinError {
    pub(crate) fn panicked(payload: PanicPayload) -> Self {
        Self {
            repr: Repr::Panicked(Mutex::new(payload)),
        }
    }

    pub(crate) fn stopped() -> Self {
        Self { repr: Repr::Stopped }
    }

    /// The task's closure panicked; the payload is preserved.
    pub fn is_panic(&self) -> bool {
        matches!(self.repr, Repr::Panicked(_))
    }

    /// The pool was stopped before the task reached any worker.
    pub fn is_stopped(&self) -> bool {
        matches!(self.repr, Repr::Stopped)
    }

    /// The captured panic payload, for re-raising with
    /// [`std::panic::resume_unwind`]. Fails (returning `self`) when the
    /// error is not a panic.
    pub fn try_into_panic(self) -> Result<Box<dyn Any + Send + 'static>, Self> {
        match self.repr {
            Repr::Panicked(payload) => Ok(payload.into_inner()),
            Repr::Stopped => Err(Self::stopped()),
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Panicked(payload) => f
                .debug_tuple("Panicked")
                .field(&panic_message(&payload.lock()))
                .finish(),
            Repr::Stopped => f.write_str("Stopped"),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Panicked(payload) => {
                write!(f, "task panicked: {}", panic_message(&payload.lock()))
            }
            Repr::Stopped => f.write_str("pool was stopped before the task ran"),
        }
    }
}

impl std::error::Error for JoinError {}

// The payload is an opaque Any; render the common &str/String cases and
// fall back to a fixed label for everything else.
pub(crate) fn panic_message(payload: &PanicPayload) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// A handle to a submitted task: yields the task's return value, its
/// captured panic, or a stopped [`JoinError`] when the pool dropped the
/// task without running it.
pub struct JoinHandle<T> {
    shared: Arc<Shared<T>>,
}

enum State<T> {
    Pending,
    Done(Result<T, PanicPayload>),
    Stopped,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

impl<T> JoinHandle<T> {
    /// Blocks until the task's outcome is delivered and consumes the
    /// handle. Exactly one value is delivered per submission.
    pub fn join(self) -> Result<T, JoinError> {
        let mut state = self.shared.state.lock();
        loop {
            match mem::replace(&mut *state, State::Pending) {
                State::Done(Ok(value)) => return Ok(value),
                State::Done(Err(payload)) => return Err(JoinError::panicked(payload)),
                State::Stopped => return Err(JoinError::stopped()),
                State::Pending => {}
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// Whether the outcome has already been delivered. `join` will not
    /// block once this returns true.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.shared.state.lock(), State::Pending)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Producer half of a [`JoinHandle`]. Completing delivers the outcome;
/// dropping without completing delivers the stopped error, which is
/// exactly what happens when a queue full of pending tasks is torn down
/// at shutdown.
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: Result<T, PanicPayload>) {
        if let Some(shared) = self.shared.take() {
            *shared.state.lock() = State::Done(result);
            shared.done.notify_all();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut state = shared.state.lock();
            if matches!(*state, State::Pending) {
                *state = State::Stopped;
                drop(state);
                shared.done.notify_all();
            }
        }
    }
}

pub(crate) fn completion_pair<T>() -> (Completer<T>, JoinHandle<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        done: Condvar::new(),
    });
    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        JoinHandle { shared },
    )
}

/// Wraps a user closure into an erased [`Task`] whose invocation settles
/// the returned handle. Panics in the closure are captured into the
/// handle; the worker that ran it carries on.
pub(crate) fn wrap_task<F, R>(f: F) -> (Task, JoinHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (completer, handle) = completion_pair();
    let task: Task = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        completer.complete(result);
    });
    (task, handle)
}
