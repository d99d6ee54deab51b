//! The work-stealing pool: per-worker deques, a global overflow queue,
//! random-start stealing and an adaptive spin/park scheduler.

pub(crate) mod context;
pub(crate) mod deque;
mod pool;
mod worker;

pub use pool::WorkStealingPool;

#[cfg(test)]
mod tests;
