//! Resource Instances
//!
//! An instance is one run of a replace-discipline computation, or the one
//! long-lived object of an in-place resource. Each instance occupies a node
//! in the ownership graph; cleanup callbacks registered by the computation
//! become finalizers of that node, and resources embedded by the
//! computation become its children.
//!
//! # Staging
//!
//! A new instance is built on a detached node. Only after the computation
//! succeeds is the node attached to its owner. If the computation fails or
//! panics, the staged node is destroyed on drop, so readers never observe a
//! half-built instance and any cleanup it registered before failing still
//! runs.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::compose::NestedSlots;
use super::definition::{InPlace, Produced, ReadFn};
use crate::graph::{NodeId, OwnershipGraph};
use crate::reactive::{Recording, TrackingFrame};

/// Identity of an instance: its graph node plus the lifecycle manager's
/// generation counter at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId {
    node: NodeId,
    generation: u64,
}

impl InstanceId {
    pub(crate) fn new(node: NodeId, generation: u64) -> Self {
        Self { node, generation }
    }

    /// The instance's node in the ownership graph.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// 1 for the first instance of a manager, incremented per replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node, self.generation)
    }
}

/// Per-instance bookkeeping shared with the hooks of running computations.
pub(crate) struct InstanceRecord {
    id: InstanceId,
    pub(crate) nested: Mutex<NestedSlots>,
}

impl InstanceRecord {
    pub(crate) fn new(id: InstanceId) -> Self {
        Self {
            id,
            nested: Mutex::new(NestedSlots::default()),
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn node(&self) -> NodeId {
        self.id.node
    }
}

/// The state an instance holds.
pub(crate) enum Materialized<A, T> {
    Value(T),
    Deferred(ReadFn<T>),
    InPlace(Box<dyn InPlace<A, Output = T>>),
}

impl<A, T> From<Produced<T>> for Materialized<A, T> {
    fn from(produced: Produced<T>) -> Self {
        match produced {
            Produced::Value(value) => Materialized::Value(value),
            Produced::Deferred(read) => Materialized::Deferred(read),
        }
    }
}

impl<A: 'static, T: Clone + 'static> Materialized<A, T> {
    /// Capture what a reader needs while the manager is locked.
    pub(crate) fn reader(&self) -> Reader<T> {
        match self {
            Materialized::Value(value) => Reader::Ready(value.clone()),
            Materialized::Deferred(read) => Reader::Deferred(Arc::clone(read)),
            Materialized::InPlace(object) => Reader::Ready(object.current()),
        }
    }
}

/// A value ready to hand out, or a deferred read still to run.
pub(crate) enum Reader<T> {
    Ready(T),
    Deferred(ReadFn<T>),
}

impl<T> Reader<T> {
    /// Produce the value. Runs outside the manager's lock.
    ///
    /// Deferred reads run in their own frame; the frame's combined tag is
    /// forwarded to the reader so it still sees what the read touched.
    pub(crate) fn read(self) -> T {
        match self {
            Reader::Ready(value) => value,
            Reader::Deferred(read) => {
                let frame = TrackingFrame::enter();
                let value = read();
                let recording = frame.finish(None);
                TrackingFrame::track(recording.tag());
                value
            }
        }
    }
}

/// The current instance of a lifecycle manager.
pub(crate) struct LiveInstance<A, T> {
    pub(crate) record: InstanceRecord,
    pub(crate) materialized: Materialized<A, T>,
    /// What the last construction or update read.
    pub(crate) recording: Recording,
}

impl<A, T> LiveInstance<A, T> {
    pub(crate) fn id(&self) -> InstanceId {
        self.record.id()
    }

    pub(crate) fn node(&self) -> NodeId {
        self.record.node()
    }

    pub(crate) fn is_in_place(&self) -> bool {
        matches!(self.materialized, Materialized::InPlace(_))
    }
}

/// A detached node for an instance under construction.
///
/// Destroyed on drop unless committed.
pub(crate) struct StagedNode {
    graph: OwnershipGraph,
    node: NodeId,
    committed: bool,
}

impl StagedNode {
    pub(crate) fn new(graph: &OwnershipGraph) -> Self {
        Self {
            graph: graph.clone(),
            node: graph.create_node(),
            committed: false,
        }
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn commit(mut self) -> NodeId {
        self.committed = true;
        self.node
    }
}

impl Drop for StagedNode {
    fn drop(&mut self) {
        if !self.committed {
            tracing::trace!(node = %self.node, "discarding staged instance");
            self.graph.destroy(self.node);
        }
    }
}
