//! Computation Hooks
//!
//! A running computation receives a [`Hooks`] value. Through it the
//! computation registers cleanup on the instance being built or updated,
//! embeds other resources, and spawns asynchronous work.
//!
//! The same instance is also published on a thread-local stack for the
//! duration of the run, which is what the free functions [`on_cleanup`] and
//! [`current_node`] consult. Calling [`on_cleanup`] with no computation
//! running is a contract violation and panics.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;

use super::async_value::AsyncSlot;
use super::compose::{self, CallSite, Nested};
use super::definition::Definition;
use super::instance::{InstanceId, InstanceRecord};
use super::manager::ManagerId;
use crate::error::SpawnError;
use crate::graph::{NodeId, OwnershipGraph};
use crate::runtime::EngineScope;

/// Per-manager storage for the async slot, type-erased.
pub(crate) type AsyncHolder = Mutex<Option<Arc<dyn Any + Send + Sync>>>;

thread_local! {
    static ACTIVE: RefCell<Vec<ActiveEntry>> = const { RefCell::new(Vec::new()) };
}

struct ActiveEntry {
    manager: ManagerId,
    graph: OwnershipGraph,
    node: NodeId,
}

/// Guard marking a computation as running on this thread.
pub(crate) struct ActiveComputation {
    manager: ManagerId,
}

impl ActiveComputation {
    pub(crate) fn enter(manager: ManagerId, graph: OwnershipGraph, node: NodeId) -> Self {
        ACTIVE.with(|stack| {
            stack.borrow_mut().push(ActiveEntry {
                manager,
                graph,
                node,
            })
        });
        Self { manager }
    }
}

impl Drop for ActiveComputation {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(entry) = popped {
                debug_assert_eq!(entry.manager, self.manager, "ActiveComputation mismatch");
            }
        });
    }
}

/// Check whether `manager` is running a computation on this thread.
pub(crate) fn is_running(manager: ManagerId) -> bool {
    ACTIVE.with(|stack| stack.borrow().iter().any(|entry| entry.manager == manager))
}

/// Register `finalizer` on the instance whose computation is running.
///
/// # Panics
///
/// Panics if no resource computation is running on this thread.
pub fn on_cleanup<F>(finalizer: F)
where
    F: FnOnce() + Send + 'static,
{
    let target = ACTIVE.with(|stack| {
        stack
            .borrow()
            .last()
            .map(|entry| (entry.graph.clone(), entry.node))
    });
    let Some((graph, node)) = target else {
        panic!("on_cleanup called outside of a running resource computation");
    };
    if let Err(err) = graph.register_finalizer(node, finalizer) {
        tracing::warn!(error = %err, "cleanup registered on a destroyed instance");
    }
}

/// The node of the instance whose computation is running, if any.
pub fn current_node() -> Option<NodeId> {
    ACTIVE.with(|stack| stack.borrow().last().map(|entry| entry.node))
}

/// Capabilities available to a running computation.
pub struct Hooks<'a> {
    scope: &'a EngineScope,
    instance: &'a InstanceRecord,
    async_holder: &'a AsyncHolder,
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        scope: &'a EngineScope,
        instance: &'a InstanceRecord,
        async_holder: &'a AsyncHolder,
    ) -> Self {
        Self {
            scope,
            instance,
            async_holder,
        }
    }

    /// Run `finalizer` when the current instance is destroyed.
    ///
    /// Finalizers of one instance run in registration order, after every
    /// resource the instance embedded has been torn down.
    pub fn on_cleanup<F>(&self, finalizer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.scope.graph.register_finalizer(self.node(), finalizer) {
            tracing::warn!(error = %err, "cleanup registered on a destroyed instance");
        }
    }

    /// Embed another resource inside the current instance.
    ///
    /// The call site identifies the embedding. Repeated calls from the same
    /// site with the same definition reuse one nested lifecycle manager and
    /// refresh its arguments; a different definition at the same site tears
    /// the previous nested instance down first. Nested instances are
    /// children of the current instance and are destroyed with it.
    #[track_caller]
    pub fn embed<B, U, F>(&self, definition: &Definition<B, U>, args: F) -> Nested<U>
    where
        B: Send + Sync + 'static,
        U: Clone + Send + Sync + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        compose::embed(self, CallSite::from(Location::caller()), definition, Arc::new(args))
    }

    /// Drive `task` on the engine's spawner.
    pub fn spawn<F>(&self, task: F) -> Result<(), SpawnError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scope.spawner.spawn(task.boxed())
    }

    /// The node of the instance being built or updated.
    pub fn node(&self) -> NodeId {
        self.instance.node()
    }

    /// The instance being built or updated.
    pub fn instance(&self) -> InstanceId {
        self.instance.id()
    }

    /// The ownership graph the instance lives in.
    pub fn graph(&self) -> &OwnershipGraph {
        &self.scope.graph
    }

    pub(crate) fn scope(&self) -> &EngineScope {
        self.scope
    }

    pub(crate) fn record(&self) -> &InstanceRecord {
        self.instance
    }

    /// The async slot of the running lifecycle manager, created on first use.
    pub(crate) fn async_slot<T>(&self) -> Arc<AsyncSlot<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut holder = self.async_holder.lock();
        if let Some(existing) = holder.as_ref() {
            if let Ok(slot) = Arc::clone(existing).downcast::<AsyncSlot<T>>() {
                return slot;
            }
        }
        let slot = Arc::new(AsyncSlot::new());
        *holder = Some(slot.clone());
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "outside of a running resource computation")]
    fn on_cleanup_outside_computation_panics() {
        on_cleanup(|| {});
    }

    #[test]
    fn active_stack_tracks_running_manager() {
        let graph = OwnershipGraph::new();
        let node = graph.create_node();
        let manager = ManagerId::new();

        assert!(!is_running(manager));
        assert_eq!(current_node(), None);
        {
            let _active = ActiveComputation::enter(manager, graph.clone(), node);
            assert!(is_running(manager));
            assert_eq!(current_node(), Some(node));
        }
        assert!(!is_running(manager));
    }

    #[test]
    fn free_on_cleanup_registers_on_running_instance() {
        let graph = OwnershipGraph::new();
        let node = graph.create_node();
        {
            let _active = ActiveComputation::enter(ManagerId::new(), graph.clone(), node);
            on_cleanup(|| {});
        }
        assert_eq!(graph.finalizer_count(node), 1);
    }
}
