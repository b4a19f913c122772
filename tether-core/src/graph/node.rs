//! Graph Nodes
//!
//! This module defines the nodes that live in the ownership graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use smallvec::SmallVec;

/// Unique identifier for a node in the ownership graph.
///
/// IDs are never reused, so an ID that is no longer present in a graph
/// always denotes a destroyed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A teardown callback registered on a node.
pub type Finalizer = Box<dyn FnOnce() + Send>;

/// A live node in the ownership graph.
pub(crate) struct OwnerNode {
    id: NodeId,

    /// The single owner of this node, if attached.
    parent: Option<NodeId>,

    /// Owned nodes, in attachment order.
    children: IndexSet<NodeId>,

    /// Callbacks to run when this node is destroyed, in registration order.
    finalizers: SmallVec<[Finalizer; 2]>,
}

impl OwnerNode {
    pub(crate) fn new() -> Self {
        Self {
            id: NodeId::new(),
            parent: None,
            children: IndexSet::new(),
            finalizers: SmallVec::new(),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: NodeId) {
        self.parent = Some(parent);
    }

    pub(crate) fn children(&self) -> &IndexSet<NodeId> {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.shift_remove(&child);
    }

    pub(crate) fn push_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizers.push(finalizer);
    }

    pub(crate) fn finalizer_count(&self) -> usize {
        self.finalizers.len()
    }

    pub(crate) fn take_finalizers(&mut self) -> SmallVec<[Finalizer; 2]> {
        std::mem::take(&mut self.finalizers)
    }
}

impl fmt::Debug for OwnerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("finalizers", &self.finalizers.len())
            .finish()
    }
}
