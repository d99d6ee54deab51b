//! Small thread coordination primitives.
//!
//! Everything here is a self-contained building block: the pools consume
//! [`BlockingQueue`] and callers typically pair submissions with a [`Latch`]
//! when they need drain-style completion guarantees.

mod barrier;
mod latch;
mod queue;
mod semaphore;
mod sharded_map;

pub use barrier::Barrier;
pub use latch::Latch;
pub use queue::{BlockingQueue, Stopped};
pub use semaphore::Semaphore;
pub use sharded_map::ShardedMap;
