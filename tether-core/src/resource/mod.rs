//! Resources
//!
//! A resource is a cached, lifecycle-managed value produced by a
//! computation with optional cleanup. The pieces:
//!
//! - [`Definition`]: the reusable description (computation + discipline).
//! - [`Resource`]: a lifecycle manager binding one definition to one owner
//!   and one argument provider. Obtained from [`Runtime::bind`](crate::Runtime::bind)
//!   or, inside another computation, from [`Hooks::embed`].
//! - Instances: nodes in the ownership graph, identified by [`InstanceId`].
//! - [`Hooks`]: what a running computation can do (cleanup, embed, spawn).
//! - [`AsyncValue`]: the value of an asynchronous definition.

mod async_value;
mod compose;
mod definition;
mod hooks;
mod instance;
mod manager;

pub use async_value::{AsyncState, AsyncValue, CommitOutcome, PendingResolution};
pub use compose::{Current, Nested};
pub use definition::{Definition, DefinitionId, Discipline, InPlace};
pub use hooks::{current_node, on_cleanup, Hooks};
pub use instance::InstanceId;
pub use manager::Resource;

pub(crate) use manager::Binding;
