//! Dependency-graph execution on top of a pool.
//!
//! A [`TaskFlow`] is built once ([`emplace`](TaskFlow::emplace) nodes,
//! wire edges with [`precede`](TaskFlow::precede)) and then handed to a
//! pool with [`run`](TaskFlow::run). Scheduling is driven entirely by
//! atomic in-degree countdowns: a node is submitted the moment its last
//! predecessor finishes, and the returned handle settles when the last
//! node of the graph does.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::runtime::join::{completion_pair, panic_message, Completer};
use crate::runtime::{JoinHandle, Spawn, Task};

/// Opaque identifier of a node added to a [`TaskFlow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(usize);

struct FlowNode {
    work: Task,
    successors: Vec<usize>,
    /// Predecessor count fixed at build time.
    in_degree: usize,
}

/// A directed acyclic graph of tasks.
///
/// The graph is move-transferable but not clonable. Cycle detection is the
/// caller's responsibility: a graph with a cycle never schedules the nodes
/// on it and its run handle never settles.
#[derive(Default)]
pub struct TaskFlow {
    nodes: Vec<FlowNode>,
}

impl TaskFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task with no dependencies yet and returns its handle.
    pub fn emplace<F>(&mut self, f: F) -> NodeHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(FlowNode {
            work: Box::new(f),
            successors: Vec::new(),
            in_degree: 0,
        });
        handle
    }

    /// Declares that `first` must complete before `second` starts.
    ///
    /// Calling this repeatedly for the same pair adds parallel edges; each
    /// one contributes a unit of in-degree and is counted down separately.
    pub fn precede(&mut self, first: NodeHandle, second: NodeHandle) {
        self.nodes[first.0].successors.push(second.0);
        self.nodes[second.0].in_degree += 1;
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Schedules the graph's entry nodes on `pool` and returns the
    /// completion handle; it settles once every node has run.
    ///
    /// The graph moves into a runtime block shared by the scheduled
    /// closures, so it outlives the caller's scope for exactly as long as
    /// nodes are still in flight. Successors are always resubmitted to the
    /// pool rather than run inline: deep graphs cannot blow the stack, and
    /// a freshly unlocked successor is immediately stealable.
    pub fn run<P>(self, pool: &Arc<P>) -> JoinHandle<()>
    where
        P: Spawn + 'static,
    {
        let (completer, handle) = completion_pair();

        if self.nodes.is_empty() {
            completer.complete(Ok(()));
            return handle;
        }

        // Entry nodes must be collected from the static in-degrees before
        // anything is scheduled: once the first entry runs, the dynamic
        // counters start moving and can reach zero mid-scan.
        let entries: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.in_degree == 0)
            .map(|(index, _)| index)
            .collect();

        let runtime = Arc::new(GraphRuntime {
            remaining: AtomicUsize::new(self.nodes.len()),
            nodes: self
                .nodes
                .into_iter()
                .map(|node| RunNode {
                    work: Mutex::new(Some(node.work)),
                    successors: node.successors,
                    pending: AtomicUsize::new(node.in_degree),
                })
                .collect(),
            completion: Mutex::new(Some(completer)),
            pool: Arc::clone(pool) as Arc<dyn Spawn>,
        });

        for index in entries {
            schedule_node(&runtime, index);
        }

        handle
    }
}

struct RunNode {
    /// Taken exactly once, by the closure that runs the node.
    work: Mutex<Option<Task>>,
    successors: Vec<usize>,
    /// Dynamic in-degree: counts down as predecessors finish.
    pending: AtomicUsize,
}

/// Per-run state shared by every scheduled closure; the run's lifetime is
/// bounded by the last closure dropping its reference, not by the caller.
struct GraphRuntime {
    nodes: Vec<RunNode>,
    remaining: AtomicUsize,
    completion: Mutex<Option<Completer<()>>>,
    pool: Arc<dyn Spawn>,
}

fn schedule_node(runtime: &Arc<GraphRuntime>, index: usize) {
    let pool = Arc::clone(&runtime.pool);
    let runtime = Arc::clone(runtime);
    pool.execute(Box::new(move || run_node(&runtime, index)));
}

fn run_node(runtime: &Arc<GraphRuntime>, index: usize) {
    let node = &runtime.nodes[index];

    if let Some(work) = node.work.lock().take() {
        // A panicking node must not derail the countdowns below: the rest
        // of the graph still runs and the run handle still settles.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
            error!(node = index, "graph task panicked: {}", panic_message(&payload));
        }
    }

    for &successor in &node.successors {
        // AcqRel: the release half publishes this node's writes to whoever
        // decrements next; the acquire half lets the scheduling thread see
        // every predecessor's writes before the successor runs.
        if runtime.nodes[successor].pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            schedule_node(runtime, successor);
        }
    }

    if runtime.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        if let Some(completer) = runtime.completion.lock().take() {
            completer.complete(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::runtime::WorkStealingPool;

    assert_impl_all!(TaskFlow: Send);
    assert_impl_all!(NodeHandle: Copy);

    fn pool(workers: usize) -> Arc<WorkStealingPool> {
        Arc::new(WorkStealingPool::new(workers))
    }

    #[test]
    fn empty_graph_completes_immediately() -> Result<()> {
        let pool = pool(2);
        let flow = TaskFlow::new();
        let handle = flow.run(&pool);
        assert!(handle.is_finished());
        handle.join()?;
        Ok(())
    }

    #[test]
    fn single_node_runs_once() -> Result<()> {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        flow.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn edge_orders_execution() -> Result<()> {
        let pool = pool(4);
        let value = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let first = {
            let value = Arc::clone(&value);
            flow.emplace(move || value.store(1, Ordering::SeqCst))
        };
        let second = {
            let value = Arc::clone(&value);
            flow.emplace(move || {
                value.fetch_add(2, Ordering::SeqCst);
            })
        };
        flow.precede(first, second);

        flow.run(&pool).join()?;
        // 3 only happens when the store ran strictly before the add.
        assert_eq!(value.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn diamond_joins_both_branches() -> Result<()> {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let pool = pool(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let bump = |flow: &mut TaskFlow| {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let a = bump(&mut flow);
        let b = bump(&mut flow);
        let c = bump(&mut flow);
        let d = {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                // All of a, b, c must be visible here.
                if counter.load(Ordering::SeqCst) == 3 {
                    counter.store(100, Ordering::SeqCst);
                }
            })
        };

        flow.precede(a, b);
        flow.precede(a, c);
        flow.precede(b, d);
        flow.precede(c, d);

        flow.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        Ok(())
    }

    #[test]
    fn independent_branches_run_in_parallel() -> Result<()> {
        // a -> {b, c, d} -> e, where b/c/d sleep while holding a gauge.
        let pool = pool(4);
        let active = Arc::new(AtomicUsize::new(0));
        let witnessed_parallelism = Arc::new(AtomicBool::new(false));

        let mut flow = TaskFlow::new();
        let a = flow.emplace(|| {});
        let e = flow.emplace(|| {});

        let sleeper = |flow: &mut TaskFlow| {
            let active = Arc::clone(&active);
            let witnessed = Arc::clone(&witnessed_parallelism);
            flow.emplace(move || {
                if active.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                    witnessed.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
            })
        };

        for _ in 0..3 {
            let node = sleeper(&mut flow);
            flow.precede(a, node);
            flow.precede(node, e);
        }

        flow.run(&pool).join()?;
        assert!(witnessed_parallelism.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn duplicate_edges_count_as_parallel_edges() -> Result<()> {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let first = {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let second = {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        // Two edges between the same pair: the successor still runs
        // exactly once, after both countdowns.
        flow.precede(first, second);
        flow.precede(first, second);

        flow.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn panicking_node_does_not_abort_the_graph() -> Result<()> {
        let pool = pool(2);
        let survivor_ran = Arc::new(AtomicBool::new(false));

        let mut flow = TaskFlow::new();
        let doomed = flow.emplace(|| panic!("node failure"));
        let survivor = {
            let survivor_ran = Arc::clone(&survivor_ran);
            flow.emplace(move || survivor_ran.store(true, Ordering::SeqCst))
        };
        flow.precede(doomed, survivor);

        // The run handle settles Ok even though a node panicked.
        flow.run(&pool).join()?;
        assert!(survivor_ran.load(Ordering::SeqCst));
        Ok(())
    }

    #[test]
    fn moved_flow_runs_identically() -> Result<()> {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let first = {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let second = {
            let counter = Arc::clone(&counter);
            flow.emplace(move || {
                counter.fetch_add(10, Ordering::SeqCst);
            })
        };
        flow.precede(first, second);

        let moved = flow;
        moved.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        Ok(())
    }

    #[test]
    fn wide_fan_out_runs_every_node() -> Result<()> {
        const WIDTH: usize = 1_000;
        let pool = pool(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let root = flow.emplace(|| {});
        for _ in 0..WIDTH {
            let counter = Arc::clone(&counter);
            let leaf = flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            flow.precede(root, leaf);
        }

        flow.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), WIDTH);
        Ok(())
    }

    #[test]
    fn deep_chain_does_not_recurse_on_the_stack() -> Result<()> {
        const DEPTH: usize = 10_000;
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut flow = TaskFlow::new();
        let mut previous = None;
        for _ in 0..DEPTH {
            let counter = Arc::clone(&counter);
            let node = flow.emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            if let Some(previous) = previous {
                flow.precede(previous, node);
            }
            previous = Some(node);
        }

        flow.run(&pool).join()?;
        assert_eq!(counter.load(Ordering::SeqCst), DEPTH);
        Ok(())
    }
}
