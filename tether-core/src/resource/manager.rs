//! Lifecycle Manager
//!
//! A lifecycle manager binds one definition to one owner and one argument
//! provider. It holds at most one current instance and decides, on every
//! read, what to do with it:
//!
//! | current instance            | replace discipline  | in-place discipline |
//! |-----------------------------|---------------------|---------------------|
//! | none, or destroyed          | construct           | construct           |
//! | dependencies unchanged      | return value        | return value        |
//! | a dependency changed        | construct + retire  | update              |
//!
//! Constructing runs the computation on a staged node inside a recording
//! frame; the node is attached to the owner only once the computation has
//! succeeded. Retiring the superseded instance happens after the manager's
//! lock is released, either immediately or at the next settle depending on
//! the runtime's [`TeardownPolicy`].
//!
//! # Reentrancy
//!
//! A computation that reads its own manager gets
//! [`ResourceError::Cycle`] instead of deadlocking.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::compose::Current;
use super::definition::{Computation, Definition, DefinitionId};
use super::hooks::{self, ActiveComputation, AsyncHolder, Hooks};
use super::instance::{InstanceId, InstanceRecord, LiveInstance, Materialized, StagedNode};
use crate::config::TeardownPolicy;
use crate::error::{OwnershipError, ResourceError};
use crate::graph::NodeId;
use crate::reactive::{CellTag, TagRef, TrackingFrame};
use crate::runtime::EngineScope;

/// Identity of a lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ManagerId(u64);

impl ManagerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Argument provider of a binding. Called inside the recording frame, so
/// cells it reads are dependencies of the instance.
pub(crate) type ArgsFn<A> = Arc<dyn Fn() -> A + Send + Sync>;

/// Type-erased access to a manager's teardown, used by composition.
pub(crate) trait Teardown: Send + Sync {
    /// Destroy the current instance now and forget it.
    fn retire_instance(&self);
}

/// Lifecycle manager for one (definition, owner, arguments) binding.
pub(crate) struct Binding<A, T> {
    id: ManagerId,
    definition: Definition<A, T>,
    owner: NodeId,
    args: RwLock<ArgsFn<A>>,
    scope: EngineScope,
    state: Mutex<Option<LiveInstance<A, T>>>,
    /// Id of the current instance, readable while a computation holds `state`.
    published: Mutex<Option<InstanceId>>,
    generation: AtomicU64,
    /// Touched by `mark_dirty`; included in every recording.
    dirty: Arc<CellTag>,
    /// Set when an embedding computation handed over new arguments.
    refreshed: AtomicBool,
    async_holder: AsyncHolder,
}

impl<A, T> Binding<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        definition: Definition<A, T>,
        owner: NodeId,
        args: ArgsFn<A>,
        scope: EngineScope,
    ) -> Self {
        scope
            .registry
            .acquire(definition.id(), definition.label(), definition.discipline());
        Self {
            id: ManagerId::new(),
            definition,
            owner,
            args: RwLock::new(args),
            scope,
            state: Mutex::new(None),
            published: Mutex::new(None),
            generation: AtomicU64::new(0),
            dirty: Arc::new(CellTag::new()),
            refreshed: AtomicBool::new(false),
            async_holder: Mutex::new(None),
        }
    }

    fn describe(&self) -> String {
        format!("resource `{}`", self.definition.label())
    }

    fn is_outdated(&self, live: &LiveInstance<A, T>) -> bool {
        self.refreshed.load(Ordering::Acquire) || live.recording.is_stale()
    }

    fn must_construct(&self, live: &LiveInstance<A, T>) -> bool {
        self.scope.graph.is_destroyed(live.node()) || (!live.is_in_place() && self.is_outdated(live))
    }

    fn current_args(&self) -> A {
        let provider = Arc::clone(&*self.args.read());
        provider()
    }

    fn evaluate(&self) -> Result<T, ResourceError> {
        if hooks::is_running(self.id) {
            return Err(ResourceError::Cycle(self.describe()));
        }
        if self.scope.graph.is_destroyed(self.owner) {
            return Err(ResourceError::OwnerDestroyed(self.owner));
        }

        let mut state = self.state.lock();
        let mut retired = None;
        let live = match state.take() {
            Some(live) if !self.must_construct(&live) => state.insert(live),
            previous => match self.construct() {
                Ok(next) => {
                    retired = previous;
                    state.insert(next)
                }
                Err(err) => {
                    *state = previous;
                    return Err(err);
                }
            },
        };

        if live.is_in_place() && self.is_outdated(live) {
            self.update(live)?;
        } else {
            tracing::trace!(resource = %self.describe(), instance = %live.id(), "cached value");
        }

        TrackingFrame::track(live.recording.tag());
        let reader = live.materialized.reader();
        drop(state);

        if let Some(old) = retired {
            self.retire(old);
        }
        Ok(reader.read())
    }

    fn construct(&self) -> Result<LiveInstance<A, T>, ResourceError> {
        let generation = self.generation.load(Ordering::Acquire) + 1;
        let staged = StagedNode::new(&self.scope.graph);
        let record = InstanceRecord::new(InstanceId::new(staged.node(), generation));

        let frame = TrackingFrame::enter();
        let produced = {
            let _active = ActiveComputation::enter(self.id, self.scope.graph.clone(), staged.node());
            let hooks = Hooks::new(&self.scope, &record, &self.async_holder);
            let args = self.current_args();
            match self.definition.computation() {
                Computation::Replace(compute) => compute(&hooks, &args).map(Materialized::from),
                Computation::InPlace(factory) => {
                    let mut object = factory();
                    object
                        .modify(&args, &hooks)
                        .map(|()| Materialized::InPlace(object))
                }
            }
        };
        let recording = frame.finish(Some(self.dirty.clone() as TagRef));

        let materialized = produced.map_err(|err| {
            tracing::debug!(resource = %self.describe(), error = %err, "construction failed");
            ResourceError::computation(err)
        })?;

        self.scope
            .graph
            .attach_child(self.owner, staged.node())
            .map_err(|err| match err {
                OwnershipError::Destroyed(node) if node == self.owner => {
                    ResourceError::OwnerDestroyed(node)
                }
                other => other.into(),
            })?;
        staged.commit();

        self.generation.store(generation, Ordering::Release);
        self.refreshed.store(false, Ordering::Release);
        *self.published.lock() = Some(record.id());
        self.scope.registry.instance_created(self.definition.id());
        tracing::debug!(
            resource = %self.describe(),
            instance = %record.id(),
            owner = %self.owner,
            dependencies = recording.dependency_count(),
            "constructed instance"
        );

        Ok(LiveInstance {
            record,
            materialized,
            recording,
        })
    }

    fn update(&self, live: &mut LiveInstance<A, T>) -> Result<(), ResourceError> {
        let LiveInstance {
            record,
            materialized,
            recording,
        } = live;
        let Materialized::InPlace(object) = materialized else {
            return Ok(());
        };

        let frame = TrackingFrame::enter();
        let outcome = {
            let _active = ActiveComputation::enter(self.id, self.scope.graph.clone(), record.node());
            let hooks = Hooks::new(&self.scope, record, &self.async_holder);
            let args = self.current_args();
            object.modify(&args, &hooks)
        };
        let next = frame.finish(Some(self.dirty.clone() as TagRef));

        match outcome {
            Ok(()) => {
                *recording = next;
                self.refreshed.store(false, Ordering::Release);
                self.scope.registry.instance_updated(self.definition.id());
                tracing::debug!(resource = %self.describe(), instance = %record.id(), "updated in place");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(resource = %self.describe(), error = %err, "update failed");
                Err(ResourceError::update(err))
            }
        }
    }

    fn retire(&self, old: LiveInstance<A, T>) {
        match self.scope.config.teardown {
            TeardownPolicy::Immediate => {
                let destroyed = self.scope.graph.destroy(old.node());
                tracing::debug!(
                    resource = %self.describe(),
                    instance = %old.id(),
                    destroyed,
                    "retired superseded instance"
                );
            }
            TeardownPolicy::Deferred => {
                self.scope.teardown.schedule(old.node());
                tracing::debug!(
                    resource = %self.describe(),
                    instance = %old.id(),
                    "scheduled teardown of superseded instance"
                );
            }
        }
    }

    pub(crate) fn refresh_args(&self, args: ArgsFn<A>) {
        *self.args.write() = args;
        self.refreshed.store(true, Ordering::Release);
    }
}

impl<A, T> Teardown for Binding<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn retire_instance(&self) {
        let taken = self.state.lock().take();
        *self.published.lock() = None;
        if let Some(live) = taken {
            let destroyed = self.scope.graph.destroy(live.node());
            tracing::debug!(resource = %self.describe(), instance = %live.id(), destroyed, "retired instance");
        }
    }
}

impl<A, T> Drop for Binding<A, T> {
    fn drop(&mut self) {
        self.scope.registry.release(self.definition.id());
    }
}

/// Object-safe view of a binding with the argument type erased.
pub(crate) trait Lifecycle<T>: Send + Sync {
    fn read(&self) -> Result<T, ResourceError>;
    fn is_stale(&self) -> bool;
    fn mark_dirty(&self);
    fn instance(&self) -> Option<InstanceId>;
    fn generation(&self) -> u64;
    fn owner(&self) -> NodeId;
    fn definition_id(&self) -> DefinitionId;
    fn label(&self) -> &str;
}

impl<A, T> Lifecycle<T> for Binding<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn read(&self) -> Result<T, ResourceError> {
        self.evaluate()
    }

    fn is_stale(&self) -> bool {
        if hooks::is_running(self.id) {
            return true;
        }
        match self.state.lock().as_ref() {
            Some(live) => self.must_construct(live) || self.is_outdated(live),
            None => true,
        }
    }

    fn mark_dirty(&self) {
        self.dirty.touch();
    }

    fn instance(&self) -> Option<InstanceId> {
        *self.published.lock()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn owner(&self) -> NodeId {
        self.owner
    }

    fn definition_id(&self) -> DefinitionId {
        self.definition.id()
    }

    fn label(&self) -> &str {
        self.definition.label()
    }
}

/// Handle to a lifecycle manager.
///
/// Cloning the handle shares the manager. The current instance belongs to
/// the owner the resource was bound to, not to the handle: dropping every
/// handle leaves the instance alive until its owner is destroyed.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::TrackedCell;
/// use tether_core::resource::Definition;
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let owner = runtime.create_owner();
/// let count = TrackedCell::new(1);
///
/// let doubled = Definition::replace(|_, count: &TrackedCell<i32>| Ok(count.get() * 2));
/// let resource = runtime.bind(&doubled, owner, {
///     let count = count.clone();
///     move || count.clone()
/// });
///
/// assert_eq!(resource.read().unwrap(), 2);
/// count.set(4);
/// assert_eq!(resource.read().unwrap(), 8);
/// ```
pub struct Resource<T> {
    inner: Arc<dyn Lifecycle<T>>,
}

impl<T> Resource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_binding<A>(binding: Arc<Binding<A, T>>) -> Self
    where
        A: Send + Sync + 'static,
    {
        Self { inner: binding }
    }

    /// Get the current value, constructing or updating the instance first
    /// if anything it read has changed.
    ///
    /// Inside another recording frame, the enclosing computation becomes
    /// dependent on this resource.
    pub fn read(&self) -> Result<T, ResourceError> {
        self.inner.read()
    }
}

impl<T> Resource<T> {
    /// Check whether the next read does work.
    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// Force the next read to reconstruct or update.
    pub fn mark_dirty(&self) {
        self.inner.mark_dirty();
    }

    /// The current instance, if one was ever constructed.
    pub fn instance(&self) -> Option<InstanceId> {
        self.inner.instance()
    }

    /// Number of instances constructed so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    /// The node this resource was bound to.
    pub fn owner(&self) -> NodeId {
        self.inner.owner()
    }

    /// Identity of the bound definition.
    pub fn definition_id(&self) -> DefinitionId {
        self.inner.definition_id()
    }
}

impl<T> Current for Resource<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn current(&self) -> Result<T, ResourceError> {
        self.read()
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("definition", &self.inner.label())
            .field("owner", &self.inner.owner())
            .field("instance", &self.inner.instance())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::TrackedCell;
    use crate::{Runtime, RuntimeConfig};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn replace_constructs_once_per_change() {
        let runtime = Runtime::new();
        let owner = runtime.create_owner();
        let input = TrackedCell::new(1);
        let runs = Arc::new(AtomicI32::new(0));

        let def = Definition::replace({
            let runs = runs.clone();
            move |_, input: &TrackedCell<i32>| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(input.get() + 100)
            }
        });
        let resource = runtime.bind(&def, owner, {
            let input = input.clone();
            move || input.clone()
        });

        assert_eq!(resource.read().unwrap(), 101);
        assert_eq!(resource.read().unwrap(), 101);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        input.set(2);
        assert!(resource.is_stale());
        assert_eq!(resource.read().unwrap(), 102);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(resource.generation(), 2);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let runtime = Runtime::new();
        let owner = runtime.create_owner();
        let slot: Arc<Mutex<Option<Resource<i32>>>> = Arc::new(Mutex::new(None));

        let def = Definition::replace({
            let slot = slot.clone();
            move |_, _: &()| {
                let this = slot.lock().clone();
                match this.map(|r| r.read()) {
                    Some(Err(ResourceError::Cycle(_))) => Ok(-1),
                    _ => Ok(0),
                }
            }
        });
        let resource = runtime.bind(&def, owner, || ());
        *slot.lock() = Some(resource.clone());

        assert_eq!(resource.read().unwrap(), -1);
    }

    #[test]
    fn failed_construction_keeps_previous_instance() {
        let runtime = Runtime::new();
        let owner = runtime.create_owner();
        let input = TrackedCell::new(1);

        let def = Definition::replace(|_, input: &TrackedCell<i32>| {
            let n = input.get();
            if n < 0 {
                anyhow::bail!("negative input {n}");
            }
            Ok(n)
        });
        let resource = runtime.bind(&def, owner, {
            let input = input.clone();
            move || input.clone()
        });

        assert_eq!(resource.read().unwrap(), 1);
        let first = resource.instance();

        input.set(-1);
        let err = resource.read().unwrap_err();
        assert!(matches!(err, ResourceError::Computation(_)));
        assert_eq!(resource.instance(), first);
        assert_eq!(runtime.graph().children(owner).len(), 1);

        input.set(3);
        assert_eq!(resource.read().unwrap(), 3);
        assert_ne!(resource.instance(), first);
    }

    #[test]
    fn mark_dirty_forces_reconstruction() {
        let runtime = Runtime::new();
        let owner = runtime.create_owner();
        let def = Definition::replace(|_, _: &()| Ok(7));
        let resource = runtime.bind(&def, owner, || ());

        resource.read().unwrap();
        assert!(!resource.is_stale());
        resource.mark_dirty();
        assert!(resource.is_stale());
        resource.read().unwrap();
        assert_eq!(resource.generation(), 2);
    }

    #[test]
    fn deferred_policy_keeps_old_instance_until_settle() {
        let runtime = Runtime::with_config(RuntimeConfig::default().with_teardown(TeardownPolicy::Deferred));
        let owner = runtime.create_owner();
        let def = Definition::replace(|_, _: &()| Ok(()));
        let resource = runtime.bind(&def, owner, || ());

        resource.read().unwrap();
        let first = resource.instance().unwrap();
        resource.mark_dirty();
        resource.read().unwrap();

        assert!(!runtime.is_destroyed(first.node()));
        assert_eq!(runtime.settle(), 1);
        assert!(runtime.is_destroyed(first.node()));
    }

    #[test]
    fn read_after_owner_destroyed_fails() {
        let runtime = Runtime::new();
        let owner = runtime.create_owner();
        let def = Definition::replace(|_, _: &()| Ok(1));
        let resource = runtime.bind(&def, owner, || ());

        resource.read().unwrap();
        runtime.destroy(owner);
        assert!(matches!(resource.read(), Err(ResourceError::OwnerDestroyed(n)) if n == owner));
    }
}
