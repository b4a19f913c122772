//! Composition
//!
//! Lets one resource's computation embed another resource. The nested
//! lifecycle manager is bound with the embedding instance as its owner, so
//! when a replace-discipline resource re-runs, the stale run's nested
//! instances are destroyed together with it and the new run builds fresh
//! ones.
//!
//! Nested managers are keyed by call site within one instance:
//!
//! - same site, same definition: the manager is reused and its arguments
//!   refreshed, which marks it dirty;
//! - same site, different definition: the previous nested instance is
//!   destroyed before the new manager is created.
//!
//! # Indirection
//!
//! [`Nested::current`] forwards to the nested manager. When the nested
//! value is itself resource-shaped (implements [`Current`]),
//! [`Nested::current_flat`] follows exactly one more level. Nothing is
//! unwrapped recursively.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use super::definition::{Definition, DefinitionId};
use super::hooks::Hooks;
use super::manager::{ArgsFn, Binding, Resource, Teardown};
use crate::error::ResourceError;

/// Source location of an `embed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

struct NestedSlot {
    definition: DefinitionId,
    binding: Arc<dyn Any + Send + Sync>,
    teardown: Arc<dyn Teardown>,
}

/// Nested managers of one instance, by call site.
#[derive(Default)]
pub(crate) struct NestedSlots {
    slots: HashMap<CallSite, NestedSlot>,
}

pub(crate) fn embed<B, U>(
    hooks: &Hooks<'_>,
    site: CallSite,
    definition: &Definition<B, U>,
    args: ArgsFn<B>,
) -> Nested<U>
where
    B: Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    let previous = {
        let mut nested = hooks.record().nested.lock();
        if let Some(slot) = nested.slots.get(&site) {
            if slot.definition == definition.id() {
                if let Ok(binding) = Arc::clone(&slot.binding).downcast::<Binding<B, U>>() {
                    binding.refresh_args(args);
                    return Nested::new(Resource::from_binding(binding));
                }
            }
        }
        nested.slots.remove(&site)
    };

    if let Some(previous) = previous {
        tracing::debug!(
            site = %site,
            replaced = %previous.definition,
            with = %definition.id(),
            "embedded definition changed, tearing down previous nested instance"
        );
        previous.teardown.retire_instance();
    }

    let binding = Arc::new(Binding::new(
        definition.clone(),
        hooks.node(),
        args,
        hooks.scope().clone(),
    ));
    hooks.record().nested.lock().slots.insert(
        site,
        NestedSlot {
            definition: definition.id(),
            binding: binding.clone(),
            teardown: binding.clone(),
        },
    );
    tracing::trace!(site = %site, definition = definition.label(), "embedded resource");
    Nested::new(Resource::from_binding(binding))
}

/// Anything exposing a current value through one level of indirection.
pub trait Current {
    /// The value produced.
    type Output;

    /// Read the current value.
    fn current(&self) -> Result<Self::Output, ResourceError>;
}

/// Handle to an embedded resource.
pub struct Nested<T> {
    resource: Resource<T>,
}

impl<T> Nested<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(resource: Resource<T>) -> Self {
        Self { resource }
    }

    /// Read the nested resource, recomputing lazily if stale.
    pub fn current(&self) -> Result<T, ResourceError> {
        self.resource.read()
    }

    /// The nested lifecycle manager.
    pub fn resource(&self) -> &Resource<T> {
        &self.resource
    }
}

impl<R> Nested<R>
where
    R: Current + Clone + Send + Sync + 'static,
{
    /// Read the nested value and then the value it points at.
    pub fn current_flat(&self) -> Result<R::Output, ResourceError> {
        Current::current(&self.current()?)
    }
}

impl<T> Current for Nested<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn current(&self) -> Result<T, ResourceError> {
        self.resource.read()
    }
}

impl<T> Clone for Nested<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

impl<T> fmt::Debug for Nested<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nested")
            .field("resource", &self.resource)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_sites_differ_by_location() {
        #[track_caller]
        fn here() -> CallSite {
            CallSite::from(Location::caller())
        }

        let a = here();
        let b = here();
        assert_ne!(a, b);
        assert_eq!(a.file, b.file);
        assert!(a.to_string().contains(file!()));
    }
}
