//! Error types for resource evaluation and ownership.

use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Errors surfaced by reading a resource.
///
/// Failures of user computations arrive as `anyhow::Error` and are wrapped
/// in [`ResourceError::Computation`] (the instance was never created) or
/// [`ResourceError::Update`] (an existing instance failed to update in
/// place). Asynchronous failures are never reported here; they are recorded
/// on the resource's [`AsyncValue`](crate::resource::AsyncValue).
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The computation failed while building a new instance.
    ///
    /// No instance was attached and the previous value, if any, is kept.
    #[error("resource computation failed: {0}")]
    Computation(Arc<anyhow::Error>),

    /// An in-place update hook failed.
    ///
    /// The instance stays attached in whatever state the hook left it.
    #[error("resource update failed: {0}")]
    Update(Arc<anyhow::Error>),

    /// A computation tried to read itself.
    #[error("dependency cycle detected while reading {0}")]
    Cycle(String),

    /// The owner the resource was bound to has been destroyed.
    #[error("owner {0} has been destroyed")]
    OwnerDestroyed(NodeId),

    /// The ownership graph refused an operation.
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}

impl ResourceError {
    pub(crate) fn computation(err: anyhow::Error) -> Self {
        ResourceError::Computation(Arc::new(err))
    }

    pub(crate) fn update(err: anyhow::Error) -> Self {
        ResourceError::Update(Arc::new(err))
    }

    /// The user error behind a computation or update failure.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            ResourceError::Computation(e) | ResourceError::Update(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Errors from the ownership graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    /// The node is not (or no longer) part of the graph.
    #[error("{0} has been destroyed")]
    Destroyed(NodeId),

    /// The child already has an owner; re-parenting is not supported.
    #[error("{child} is already owned by {owner}")]
    AlreadyOwned {
        /// The node that was being attached.
        child: NodeId,
        /// Its existing owner.
        owner: NodeId,
    },

    /// Attaching would make a node own one of its ancestors.
    #[error("attaching {child} under {parent} would create a cycle")]
    WouldCycle {
        /// The requested owner.
        parent: NodeId,
        /// The node that was being attached.
        child: NodeId,
    },
}

/// Errors from handing a future to a [`Spawner`](crate::Spawner).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// There is no executor to run the future on.
    #[error("no async runtime available to drive the computation")]
    NoRuntime,
}

/// Errors from loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration text was not valid.
    #[error("invalid runtime configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("not found: {0}")]
    struct NotFound(u32);

    #[test]
    fn user_error_can_be_downcast() {
        let err = ResourceError::computation(NotFound(7).into());
        assert_eq!(err.downcast_ref::<NotFound>().map(|e| e.0), Some(7));
        assert!(err.to_string().contains("not found: 7"));
    }

    #[test]
    fn system_errors_have_no_user_error() {
        let err = ResourceError::Cycle("cache #1".into());
        assert!(err.user_error().is_none());
    }

    #[test]
    fn ownership_errors_convert() {
        let node = crate::graph::OwnershipGraph::new().create_node();
        let err: ResourceError = OwnershipError::Destroyed(node).into();
        assert!(matches!(err, ResourceError::Ownership(OwnershipError::Destroyed(n)) if n == node));
    }
}
