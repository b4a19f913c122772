//! Ownership Graph
//!
//! This module implements the tree that decides teardown order. Every
//! owning context and every resource instance is a node. A node has at most
//! one parent and an ordered set of children.
//!
//! # Overview
//!
//! Destroying a node destroys its whole subtree, depth-first and
//! post-order: children go before their parent, and a node's own
//! finalizers run in the order they were registered.
//!
//! # Design Decisions
//!
//! 1. The graph is a strict tree stored as an arena keyed by [`NodeId`] with
//!    parent indices. There are no general edges, so teardown order is
//!    always well defined and no cycle detection is needed beyond refusing
//!    to attach a node under its own descendant.
//!
//! 2. Destroyed nodes are removed from the arena. Since IDs are never
//!    reused, "not present" means "destroyed".
//!
//! 3. Every node of a subtree is marked destroyed under the lock before any
//!    finalizer runs, and finalizers run after the lock is released. A
//!    finalizer may therefore use the graph freely, and an asynchronous
//!    commit that checks liveness through [`OwnershipGraph::with_live`]
//!    either happens entirely before the teardown or not at all.

mod node;
mod scheduler;

pub use node::{Finalizer, NodeId};
pub use scheduler::TeardownScheduler;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::OwnershipError;
use node::OwnerNode;

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<NodeId, OwnerNode>,
}

impl GraphInner {
    fn insert(&mut self, node: OwnerNode) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    fn is_ancestor(&self, candidate: NodeId, mut of: NodeId) -> bool {
        loop {
            if candidate == of {
                return true;
            }
            match self.nodes.get(&of).and_then(|node| node.parent()) {
                Some(parent) => of = parent,
                None => return false,
            }
        }
    }

    /// Remove a subtree from the arena, returning its finalizers in teardown
    /// order.
    fn detach_subtree(&mut self, root: NodeId) -> Vec<(NodeId, SmallVec<[Finalizer; 2]>)> {
        if !self.nodes.contains_key(&root) {
            return Vec::new();
        }

        if let Some(parent) = self.nodes.get(&root).and_then(|node| node.parent()) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.remove_child(root);
            }
        }

        // Iterative post-order: a node is emitted after all of its children.
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(node) = self.nodes.get(&id) {
                for child in node.children().iter().rev() {
                    stack.push((*child, false));
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| {
                self.nodes
                    .remove(&id)
                    .map(|mut node| (id, node.take_finalizers()))
            })
            .collect()
    }
}

/// The ownership forest shared by an engine and everything it creates.
///
/// Cloning is cheap; clones refer to the same graph.
#[derive(Clone, Default)]
pub struct OwnershipGraph {
    inner: Arc<Mutex<GraphInner>>,
}

impl OwnershipGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root node with no parent.
    pub fn create_node(&self) -> NodeId {
        self.inner.lock().insert(OwnerNode::new())
    }

    /// Create a node already attached under `parent`.
    pub fn create_child(&self, parent: NodeId) -> Result<NodeId, OwnershipError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&parent) {
            return Err(OwnershipError::Destroyed(parent));
        }
        let mut node = OwnerNode::new();
        node.set_parent(parent);
        let id = inner.insert(node);
        if let Some(parent_node) = inner.nodes.get_mut(&parent) {
            parent_node.add_child(id);
        }
        Ok(id)
    }

    /// Make `child` owned by `parent`.
    ///
    /// Fails if either node is destroyed, if `child` already has an owner,
    /// or if `child` is `parent` or one of its ancestors.
    pub fn attach_child(&self, parent: NodeId, child: NodeId) -> Result<(), OwnershipError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&parent) {
            return Err(OwnershipError::Destroyed(parent));
        }
        let existing = match inner.nodes.get(&child) {
            Some(node) => node.parent(),
            None => return Err(OwnershipError::Destroyed(child)),
        };
        if let Some(existing) = existing {
            return Err(OwnershipError::AlreadyOwned {
                child,
                owner: existing,
            });
        }
        if inner.is_ancestor(child, parent) {
            return Err(OwnershipError::WouldCycle { parent, child });
        }

        if let Some(node) = inner.nodes.get_mut(&child) {
            node.set_parent(parent);
        }
        if let Some(node) = inner.nodes.get_mut(&parent) {
            node.add_child(child);
        }
        Ok(())
    }

    /// Register a callback to run when `node` is destroyed.
    pub fn register_finalizer<F>(&self, node: NodeId, finalizer: F) -> Result<(), OwnershipError>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.inner.lock().nodes.get_mut(&node) {
            Some(owner) => {
                owner.push_finalizer(Box::new(finalizer));
                Ok(())
            }
            None => Err(OwnershipError::Destroyed(node)),
        }
    }

    /// Destroy `node` and everything it owns.
    ///
    /// Children are destroyed before their parents. Destroying a node that
    /// is already gone is a no-op. Returns the number of nodes destroyed.
    pub fn destroy(&self, node: NodeId) -> usize {
        let doomed = self.inner.lock().detach_subtree(node);
        if doomed.is_empty() {
            return 0;
        }

        tracing::trace!(root = %node, nodes = doomed.len(), "destroying subtree");

        let count = doomed.len();
        for (id, finalizers) in doomed {
            for finalizer in finalizers {
                if panic::catch_unwind(AssertUnwindSafe(finalizer)).is_err() {
                    tracing::warn!(node = %id, "finalizer panicked during teardown");
                }
            }
        }
        count
    }

    /// Check whether `node` has been destroyed.
    pub fn is_destroyed(&self, node: NodeId) -> bool {
        !self.inner.lock().nodes.contains_key(&node)
    }

    /// Run `f` while holding the graph lock, but only if `node` is alive.
    ///
    /// No destruction can start while `f` runs, so the liveness check and
    /// whatever `f` commits are atomic together. `f` must not call back
    /// into this graph.
    pub fn with_live<R>(&self, node: NodeId, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        if inner.nodes.contains_key(&node) {
            Some(f())
        } else {
            None
        }
    }

    /// The owner of `node`, if it has one and is alive.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.lock().nodes.get(&node).and_then(|n| n.parent())
    }

    /// The nodes owned by `node`, in attachment order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.children().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of finalizers waiting on `node`.
    pub fn finalizer_count(&self, node: NodeId) -> usize {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.finalizer_count())
            .unwrap_or(0)
    }

    /// Get the total number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl std::fmt::Debug for OwnershipGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipGraph")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Finalizer) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |name: &'static str| -> Finalizer {
                let log = log.clone();
                Box::new(move || log.lock().push(name))
            }
        };
        (log, make)
    }

    #[test]
    fn create_and_attach() {
        let graph = OwnershipGraph::new();
        let parent = graph.create_node();
        let child = graph.create_node();

        graph.attach_child(parent, child).unwrap();
        assert_eq!(graph.parent(child), Some(parent));
        assert_eq!(graph.children(parent), vec![child]);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn attach_rejects_second_owner() {
        let graph = OwnershipGraph::new();
        let a = graph.create_node();
        let b = graph.create_node();
        let child = graph.create_child(a).unwrap();

        let err = graph.attach_child(b, child).unwrap_err();
        assert_eq!(err, OwnershipError::AlreadyOwned { child, owner: a });
    }

    #[test]
    fn attach_rejects_cycles() {
        let graph = OwnershipGraph::new();
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();

        let err = graph.attach_child(child, root).unwrap_err();
        assert_eq!(err, OwnershipError::WouldCycle { parent: child, child: root });
    }

    #[test]
    fn attach_rejects_destroyed_nodes() {
        let graph = OwnershipGraph::new();
        let parent = graph.create_node();
        let child = graph.create_node();
        graph.destroy(parent);

        assert_eq!(
            graph.attach_child(parent, child),
            Err(OwnershipError::Destroyed(parent))
        );
    }

    #[test]
    fn destroy_is_post_order() {
        let graph = OwnershipGraph::new();
        let (log, finalizer) = recorder();

        let root = graph.create_node();
        let a = graph.create_child(root).unwrap();
        let a1 = graph.create_child(a).unwrap();
        let b = graph.create_child(root).unwrap();

        graph.register_finalizer(root, finalizer("root")).unwrap();
        graph.register_finalizer(a, finalizer("a")).unwrap();
        graph.register_finalizer(a1, finalizer("a1")).unwrap();
        graph.register_finalizer(b, finalizer("b")).unwrap();

        assert_eq!(graph.destroy(root), 4);
        assert_eq!(*log.lock(), vec!["a1", "a", "b", "root"]);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn finalizers_run_in_registration_order() {
        let graph = OwnershipGraph::new();
        let (log, finalizer) = recorder();
        let node = graph.create_node();

        graph.register_finalizer(node, finalizer("first")).unwrap();
        graph.register_finalizer(node, finalizer("second")).unwrap();
        graph.register_finalizer(node, finalizer("third")).unwrap();

        graph.destroy(node);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn destroy_is_idempotent() {
        let graph = OwnershipGraph::new();
        let (log, finalizer) = recorder();
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();
        graph.register_finalizer(child, finalizer("child")).unwrap();

        assert_eq!(graph.destroy(child), 1);
        assert_eq!(graph.destroy(child), 0);
        assert_eq!(graph.destroy(root), 1);
        assert_eq!(graph.destroy(root), 0);
        assert_eq!(*log.lock(), vec!["child"]);
        assert!(graph.children(root).is_empty());
    }

    #[test]
    fn destroying_child_detaches_it() {
        let graph = OwnershipGraph::new();
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();

        graph.destroy(child);
        assert!(graph.is_destroyed(child));
        assert!(!graph.is_destroyed(root));
        assert!(graph.children(root).is_empty());
    }

    #[test]
    fn finalizer_sees_subtree_destroyed() {
        let graph = OwnershipGraph::new();
        let root = graph.create_node();
        let child = graph.create_child(root).unwrap();
        let observed = Arc::new(Mutex::new(None));

        graph
            .register_finalizer(child, {
                let graph = graph.clone();
                let observed = observed.clone();
                move || *observed.lock() = Some(graph.is_destroyed(root))
            })
            .unwrap();

        graph.destroy(root);
        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn panicking_finalizer_does_not_stop_teardown() {
        let graph = OwnershipGraph::new();
        let (log, finalizer) = recorder();
        let node = graph.create_node();

        graph.register_finalizer(node, || panic!("boom")).unwrap();
        graph.register_finalizer(node, finalizer("after")).unwrap();

        graph.destroy(node);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn with_live_only_runs_for_live_nodes() {
        let graph = OwnershipGraph::new();
        let node = graph.create_node();

        assert_eq!(graph.with_live(node, || 7), Some(7));
        graph.destroy(node);
        assert_eq!(graph.with_live(node, || 7), None);
    }

    #[test]
    fn register_on_destroyed_node_fails() {
        let graph = OwnershipGraph::new();
        let node = graph.create_node();
        graph.destroy(node);

        assert_eq!(
            graph.register_finalizer(node, || {}),
            Err(OwnershipError::Destroyed(node))
        );
    }
}
