//! Resource Definitions
//!
//! A definition is the reusable description of how to build an instance:
//! a computation plus the discipline that decides what happens when the
//! computation's inputs change. Definitions are created once and never
//! mutated. The same definition may be bound at any number of call sites;
//! each binding gets its own lifecycle manager and its own instances.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::hooks::Hooks;

/// Identity of a definition. Clones of a definition share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefinitionId(u64);

impl DefinitionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "definition#{}", self.0)
    }
}

/// How a definition reacts to stale inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// Build a brand-new instance and retire the previous one.
    Replace,

    /// Keep the instance and call its update hook.
    MutateInPlace,
}

/// A stateful resource that survives input changes.
///
/// The object is constructed once per lifecycle manager. `modify` runs
/// right after construction and again every time the inputs it read are
/// stale. `current` produces the value handed to readers.
///
/// # Example
///
/// ```rust
/// use tether_core::resource::{Hooks, InPlace};
///
/// #[derive(Default)]
/// struct Doubler {
///     value: i64,
/// }
///
/// impl InPlace<i64> for Doubler {
///     type Output = i64;
///
///     fn modify(&mut self, n: &i64, _hooks: &Hooks<'_>) -> anyhow::Result<()> {
///         self.value = n * 2;
///         Ok(())
///     }
///
///     fn current(&self) -> i64 {
///         self.value
///     }
/// }
/// ```
pub trait InPlace<A>: Send + 'static {
    /// The value readers receive.
    type Output;

    /// Update hook. Reads of tracked cells made here decide when the next
    /// update happens.
    fn modify(&mut self, args: &A, hooks: &Hooks<'_>) -> anyhow::Result<()>;

    /// Read the current value.
    fn current(&self) -> Self::Output;
}

/// A read closure returned by a deferred computation.
pub(crate) type ReadFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// What one run of a replace-discipline computation produced.
pub(crate) enum Produced<T> {
    Value(T),
    Deferred(ReadFn<T>),
}

type ReplaceFn<A, T> = dyn Fn(&Hooks<'_>, &A) -> anyhow::Result<Produced<T>> + Send + Sync;
type FactoryFn<A, T> = dyn Fn() -> Box<dyn InPlace<A, Output = T>> + Send + Sync;

/// The computation, tagged with its discipline once at creation time.
pub(crate) enum Computation<A, T> {
    Replace(Box<ReplaceFn<A, T>>),
    InPlace(Box<FactoryFn<A, T>>),
}

/// Reusable, identity-stable description of a resource.
///
/// `A` is the argument type produced by the binding's argument provider,
/// `T` the value type readers receive.
pub struct Definition<A, T> {
    id: DefinitionId,
    label: Option<Arc<str>>,
    computation: Arc<Computation<A, T>>,
}

impl<A, T> Definition<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn from_computation(computation: Computation<A, T>) -> Self {
        Self {
            id: DefinitionId::new(),
            label: None,
            computation: Arc::new(computation),
        }
    }

    /// A definition whose instances are rebuilt from scratch whenever
    /// anything the computation read changes.
    pub fn replace<F>(compute: F) -> Self
    where
        F: Fn(&Hooks<'_>, &A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let compute: Box<ReplaceFn<A, T>> =
            Box::new(move |hooks, args| compute(hooks, args).map(Produced::Value));
        Self::from_computation(Computation::Replace(compute))
    }

    /// A replace-discipline definition split into a setup phase and a read
    /// phase.
    ///
    /// The computation runs once per instance and returns a read closure.
    /// The closure runs on every read in its own recording frame, so cells
    /// it reads do not trigger a new setup.
    pub fn deferred<F, R>(compute: F) -> Self
    where
        F: Fn(&Hooks<'_>, &A) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Fn() -> T + Send + Sync + 'static,
    {
        let compute: Box<ReplaceFn<A, T>> = Box::new(move |hooks, args| {
            compute(hooks, args).map(|read| Produced::Deferred(Arc::new(read) as ReadFn<T>))
        });
        Self::from_computation(Computation::Replace(compute))
    }

    /// A definition whose single instance is updated in place.
    pub fn in_place<F, R>(factory: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: InPlace<A, Output = T>,
    {
        let factory: Box<FactoryFn<A, T>> =
            Box::new(move || Box::new(factory()) as Box<dyn InPlace<A, Output = T>>);
        Self::from_computation(Computation::InPlace(factory))
    }
}

impl<A, T> Definition<A, T> {
    /// Attach a label used in logs and registry stats.
    pub fn named(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Identity shared by all clones.
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    /// The label, or `"anonymous"`.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("anonymous")
    }

    /// The update discipline fixed at creation time.
    pub fn discipline(&self) -> Discipline {
        match *self.computation {
            Computation::Replace(_) => Discipline::Replace,
            Computation::InPlace(_) => Discipline::MutateInPlace,
        }
    }

    pub(crate) fn computation(&self) -> &Computation<A, T> {
        &self.computation
    }
}

impl<A, T> Clone for Definition<A, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            computation: Arc::clone(&self.computation),
        }
    }
}

impl<A, T> fmt::Debug for Definition<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("discipline", &self.discipline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl InPlace<()> for Noop {
        type Output = ();

        fn modify(&mut self, _: &(), _: &Hooks<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn current(&self) {}
    }

    #[test]
    fn discipline_is_fixed_by_constructor() {
        let replace: Definition<(), u32> = Definition::replace(|_, _| Ok(1));
        let deferred: Definition<(), u32> = Definition::deferred(|_, _| Ok(|| 1));
        let in_place: Definition<(), ()> = Definition::in_place(|| Noop);

        assert_eq!(replace.discipline(), Discipline::Replace);
        assert_eq!(deferred.discipline(), Discipline::Replace);
        assert_eq!(in_place.discipline(), Discipline::MutateInPlace);
    }

    #[test]
    fn clones_share_identity() {
        let a: Definition<(), u32> = Definition::replace(|_, _| Ok(1)).named("one");
        let b = a.clone();
        let c: Definition<(), u32> = Definition::replace(|_, _| Ok(1));

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(b.label(), "one");
        assert_eq!(c.label(), "anonymous");
    }
}
