//! Teardown Scheduler
//!
//! The scheduler holds nodes whose destruction has been requested but not
//! yet performed. It is used when superseded instances are retired lazily:
//! a replaced instance stays attached to its owner until the next settle,
//! or until the owner itself is destroyed, whichever comes first.
//!
//! # Algorithm
//!
//! 1. `schedule` appends a node to an insertion-ordered set, so duplicates
//!    are ignored in constant time.
//! 2. `settle` drains the queue in FIFO order and destroys each node.
//!    Nodes that were already destroyed in the meantime are skipped.
//! 3. Finalizers may schedule more teardown; `settle` keeps draining until
//!    the queue is empty.

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::{NodeId, OwnershipGraph};

/// Queue of pending teardowns for one graph.
pub struct TeardownScheduler {
    graph: OwnershipGraph,
    queue: Mutex<IndexSet<NodeId>>,
}

impl TeardownScheduler {
    /// Create a scheduler bound to `graph`.
    pub fn new(graph: OwnershipGraph) -> Self {
        Self {
            graph,
            queue: Mutex::new(IndexSet::new()),
        }
    }

    /// Request that `node` be destroyed at the next settle.
    pub fn schedule(&self, node: NodeId) {
        self.queue.lock().insert(node);
    }

    /// Destroy every scheduled node.
    ///
    /// Returns the number of graph nodes destroyed, including descendants.
    pub fn settle(&self) -> usize {
        let mut destroyed = 0;
        loop {
            // Pop under the lock, destroy outside it: finalizers may schedule.
            let next = self.queue.lock().shift_remove_index(0);
            let Some(node) = next else {
                break;
            };
            destroyed += self.graph.destroy(node);
        }
        if destroyed > 0 {
            tracing::debug!(destroyed, "settled deferred teardown");
        }
        destroyed
    }

    /// Nodes still alive and waiting for teardown, in scheduling order.
    ///
    /// A node destroyed in the meantime, for example together with its
    /// owner, is not listed.
    pub fn pending(&self) -> Vec<NodeId> {
        self.queue
            .lock()
            .iter()
            .copied()
            .filter(|node| !self.graph.is_destroyed(*node))
            .collect()
    }
}

impl std::fmt::Debug for TeardownScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownScheduler")
            .field("pending", &self.queue.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn scheduled_nodes_survive_until_settle() {
        let graph = OwnershipGraph::new();
        let scheduler = TeardownScheduler::new(graph.clone());
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();

        scheduler.schedule(child);
        scheduler.schedule(child);
        assert_eq!(scheduler.pending(), vec![child]);
        assert!(!graph.is_destroyed(child));

        assert_eq!(scheduler.settle(), 1);
        assert!(graph.is_destroyed(child));
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn settle_skips_nodes_destroyed_elsewhere() {
        let graph = OwnershipGraph::new();
        let scheduler = TeardownScheduler::new(graph.clone());
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();

        scheduler.schedule(child);
        graph.destroy(root);

        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.settle(), 0);
    }

    #[test]
    fn pending_keeps_scheduling_order() {
        let graph = OwnershipGraph::new();
        let scheduler = TeardownScheduler::new(graph.clone());
        let nodes: Vec<_> = (0..3).map(|_| graph.create_node()).collect();

        scheduler.schedule(nodes[2]);
        scheduler.schedule(nodes[0]);
        scheduler.schedule(nodes[2]);
        scheduler.schedule(nodes[1]);
        assert_eq!(scheduler.pending(), vec![nodes[2], nodes[0], nodes[1]]);

        graph.destroy(nodes[0]);
        assert_eq!(scheduler.pending(), vec![nodes[2], nodes[1]]);
        assert_eq!(scheduler.settle(), 2);
    }

    #[test]
    fn finalizers_may_schedule_more_teardown() {
        let graph = OwnershipGraph::new();
        let scheduler = Arc::new(TeardownScheduler::new(graph.clone()));
        let first = graph.create_node();
        let second = graph.create_node();
        let runs = Arc::new(AtomicUsize::new(0));

        graph
            .register_finalizer(first, {
                let scheduler = scheduler.clone();
                let runs = runs.clone();
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    scheduler.schedule(second);
                }
            })
            .unwrap();

        scheduler.schedule(first);
        assert_eq!(scheduler.settle(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(graph.is_destroyed(second));
    }
}
