//! Runtime
//!
//! The runtime is the engine context that ties the pieces together: one
//! ownership graph, the teardown queue for deferred retirement, the spawner
//! that drives asynchronous computations, and the definition registry.
//!
//! # How It Works
//!
//! 1. The host creates owner nodes with [`Runtime::create_owner`].
//!
//! 2. [`Runtime::bind`] turns a definition plus an owner plus an argument
//!    provider into a [`Resource`]. Nothing runs yet.
//!
//! 3. Reading the resource constructs, updates, or replaces its instance as
//!    needed. Instances are children of the owner.
//!
//! 4. [`Runtime::destroy`] tears down an owner and everything under it,
//!    children before parents.
//!
//! 5. With [`TeardownPolicy::Deferred`], superseded instances wait for
//!    [`Runtime::settle`].
//!
//! # Thread Safety
//!
//! The runtime is cheap to clone and every handle it hands out is
//! `Send + Sync`.

use std::sync::Arc;

use crate::config::{RuntimeConfig, TeardownPolicy};
use crate::graph::{NodeId, OwnershipGraph, TeardownScheduler};
use crate::registry::{DefinitionRegistry, DefinitionStats};
use crate::resource::{Binding, Definition, DefinitionId, Resource};
use crate::spawner::{Spawner, TokioSpawner};

/// Everything a lifecycle manager needs from its runtime.
#[derive(Clone)]
pub(crate) struct EngineScope {
    pub(crate) graph: OwnershipGraph,
    pub(crate) teardown: Arc<TeardownScheduler>,
    pub(crate) spawner: Arc<dyn Spawner>,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Arc<DefinitionRegistry>,
}

/// The resource engine.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use tether_core::resource::Definition;
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let owner = runtime.create_owner();
/// let closed = Arc::new(AtomicUsize::new(0));
///
/// let connection = Definition::replace({
///     let closed = closed.clone();
///     move |hooks, url: &String| {
///         let closed = closed.clone();
///         hooks.on_cleanup(move || {
///             closed.fetch_add(1, Ordering::SeqCst);
///         });
///         Ok(format!("connected to {url}"))
///     }
/// });
///
/// let resource = runtime.bind(&connection, owner, || "db://local".to_string());
/// assert_eq!(resource.read().unwrap(), "connected to db://local");
///
/// runtime.destroy(owner);
/// assert_eq!(closed.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Runtime {
    scope: EngineScope,
}

impl Runtime {
    /// Create a runtime with the default configuration and a tokio spawner.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Create a root owner node.
    pub fn create_owner(&self) -> NodeId {
        let node = self.scope.graph.create_node();
        tracing::trace!(%node, "created owner");
        node
    }

    /// Create an owner node under `parent`.
    pub fn create_child_owner(&self, parent: NodeId) -> Result<NodeId, crate::OwnershipError> {
        self.scope.graph.create_child(parent)
    }

    /// Bind `definition` to `owner`.
    ///
    /// `args` is called at the start of every construction and update, inside
    /// the recording frame, so cells it reads are dependencies too. Each call
    /// to `bind` creates an independent lifecycle manager.
    pub fn bind<A, T, F>(&self, definition: &Definition<A, T>, owner: NodeId, args: F) -> Resource<T>
    where
        A: Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        tracing::trace!(definition = definition.label(), %owner, "bound resource");
        let binding = Binding::new(definition.clone(), owner, Arc::new(args), self.scope.clone());
        Resource::from_binding(Arc::new(binding))
    }

    /// Destroy `node` and everything it owns.
    ///
    /// Returns the number of nodes destroyed; 0 if already destroyed.
    pub fn destroy(&self, node: NodeId) -> usize {
        self.scope.graph.destroy(node)
    }

    /// Check whether `node` has been destroyed.
    pub fn is_destroyed(&self, node: NodeId) -> bool {
        self.scope.graph.is_destroyed(node)
    }

    /// Destroy every superseded instance waiting for deferred teardown.
    pub fn settle(&self) -> usize {
        self.scope.teardown.settle()
    }

    /// Live nodes waiting for deferred teardown, in scheduling order.
    pub fn pending_teardown(&self) -> Vec<NodeId> {
        self.scope.teardown.pending()
    }

    /// The ownership graph.
    pub fn graph(&self) -> &OwnershipGraph {
        &self.scope.graph
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.scope.config
    }

    /// Registry entry for a definition with at least one live manager.
    pub fn definition_stats(&self, id: DefinitionId) -> Option<DefinitionStats> {
        self.scope.registry.get(id)
    }

    /// Number of definitions with at least one live manager.
    pub fn registered_definitions(&self) -> usize {
        self.scope.registry.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("graph", &self.scope.graph)
            .field("teardown", &self.scope.teardown)
            .field("config", &self.scope.config)
            .finish()
    }
}

/// Builder for [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    spawner: Option<Arc<dyn Spawner>>,
}

impl RuntimeBuilder {
    /// Use `config`.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting the teardown policy.
    pub fn teardown(mut self, policy: TeardownPolicy) -> Self {
        self.config.teardown = policy;
        self
    }

    /// Drive asynchronous computations with `spawner` instead of the ambient
    /// tokio runtime.
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn build(self) -> Runtime {
        let graph = OwnershipGraph::new();
        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(TokioSpawner::new()) as Arc<dyn Spawner>);
        tracing::debug!(teardown = ?self.config.teardown, "runtime created");
        Runtime {
            scope: EngineScope {
                teardown: Arc::new(TeardownScheduler::new(graph.clone())),
                graph,
                spawner,
                config: self.config,
                registry: Arc::new(DefinitionRegistry::default()),
            },
        }
    }
}
