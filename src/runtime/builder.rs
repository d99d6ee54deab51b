use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::runtime::stealing::WorkStealingPool;

/// Yield-loop iterations before an idle worker parks. Around a few
/// microseconds of spinning on current hardware.
const DEFAULT_SPIN_THRESHOLD: u32 = 4000;

/// Upper bound on how long a lost wake-up can delay an idle worker.
const DEFAULT_PARK_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) type ThreadNameFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(0));

    Arc::new(move || {
        let prev = counter.fetch_add(1, Ordering::Relaxed);
        format!("threadflow-worker-{prev}")
    })
}

/// Resolved configuration handed to the pool.
#[derive(Clone)]
pub(crate) struct PoolConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) spin_threshold: u32,
    pub(crate) park_timeout: Duration,
}

/// Configures and builds a [`WorkStealingPool`].
///
/// ```
/// use threadflow::Builder;
///
/// let pool = Builder::new()
///     .worker_threads(2)
///     .thread_name("compute")
///     .build();
/// assert_eq!(pool.worker_count(), 2);
/// ```
pub struct Builder {
    /// The number of worker threads. Defaults to one per CPU core; zero is
    /// coerced to one at build time.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the pool.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the pool.
    thread_stack_size: Option<usize>,

    spin_threshold: u32,

    park_timeout: Duration,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
            park_timeout: DEFAULT_PARK_TIMEOUT,
        }
    }

    pub fn worker_threads(&mut self, val: usize) -> &mut Self {
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of threads spawned by the pool.
    ///
    /// The default names are "threadflow-worker-{N}".
    pub fn thread_name(&mut self, val: impl Into<String>) -> &mut Self {
        let val = val.into();
        self.thread_name = Arc::new(move || val.clone());
        self
    }

    /// Sets a function used to generate the name of threads spawned by the
    /// pool.
    pub fn thread_name_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = Arc::new(f);
        self
    }

    /// Sets the stack size (in bytes) for worker threads. The platform
    /// minimum applies if it is larger.
    pub fn thread_stack_size(&mut self, val: usize) -> &mut Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Sets how many empty-handed loop iterations a worker yields through
    /// before parking.
    pub fn spin_threshold(&mut self, val: u32) -> &mut Self {
        self.spin_threshold = val;
        self
    }

    /// Sets the parked wait timeout. This bounds the latency with which a
    /// worker rediscovers work after a lost wake-up, so very large values
    /// trade idle CPU for submission latency.
    pub fn park_timeout(&mut self, val: Duration) -> &mut Self {
        self.park_timeout = val;
        self
    }

    /// Creates the configured pool and starts its workers.
    pub fn build(&mut self) -> WorkStealingPool {
        let worker_threads = self
            .worker_threads
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, usize::from))
            .max(1);

        WorkStealingPool::with_config(PoolConfig {
            worker_threads,
            thread_name: Arc::clone(&self.thread_name),
            thread_stack_size: self.thread_stack_size,
            spin_threshold: self.spin_threshold,
            park_timeout: self.park_timeout,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
