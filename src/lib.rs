//! Thread coordination primitives and task-execution engines for CPU-bound
//! workloads.
//!
//! The execution substrate is a [`WorkStealingPool`]: worker threads with
//! per-worker deques, a global overflow queue, cross-worker stealing and an
//! adaptive spin/park scheduler. Two engines ride on top of it:
//!
//! - [`TaskFlow`] runs a directed-acyclic dependency graph to completion.
//! - [`Scheduler`] drives delayed and periodic tasks against a wall clock.
//!
//! The [`sync`] module holds the small coordination primitives the substrate
//! and its users compose: [`Latch`], [`Semaphore`], [`Barrier`],
//! [`BlockingQueue`] and [`ShardedMap`].
//!
//! ```
//! use threadflow::WorkStealingPool;
//!
//! let pool = WorkStealingPool::new(2);
//! let handle = pool.submit(|| 40 + 2);
//! assert_eq!(handle.join().unwrap(), 42);
//! ```

pub mod sync;
pub use sync::{Barrier, BlockingQueue, Latch, Semaphore, ShardedMap, Stopped};

pub mod runtime;
pub use runtime::{Builder, JoinError, JoinHandle, Spawn, Task, ThreadPool, WorkStealingPool};

pub mod flow;
pub use flow::{NodeHandle, TaskFlow};

pub mod timer;
pub use timer::Scheduler;
