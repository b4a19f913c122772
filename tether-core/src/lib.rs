//! Tether Core
//!
//! This crate provides a lifecycle and cache engine for reactive resources.
//! A resource turns an ordinary function into a cached, invalidation-aware,
//! lifecycle-managed unit:
//!
//! - Values are recomputed lazily, only when something they read changed
//! - Each value lives in an instance owned by a node in an ownership tree
//! - Cleanup callbacks run when an instance is superseded or its owner dies
//! - Resources compose, and asynchronous results commit only while their
//!   instance is still alive
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: tracked cells, recording frames, and memoized caches
//! - `graph`: the ownership tree and deferred teardown queue
//! - `resource`: definitions, lifecycle managers, composition, async values
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tether_core::reactive::TrackedCell;
//! use tether_core::resource::Definition;
//! use tether_core::Runtime;
//!
//! let runtime = Runtime::new();
//! let owner = runtime.create_owner();
//! let id = TrackedCell::new(1);
//! let released = Arc::new(AtomicUsize::new(0));
//!
//! let session = Definition::replace({
//!     let released = released.clone();
//!     move |hooks, id: &TrackedCell<u32>| {
//!         let released = released.clone();
//!         hooks.on_cleanup(move || {
//!             released.fetch_add(1, Ordering::SeqCst);
//!         });
//!         Ok(format!("session-{}", id.get()))
//!     }
//! });
//!
//! let resource = runtime.bind(&session, owner, {
//!     let id = id.clone();
//!     move || id.clone()
//! });
//!
//! assert_eq!(resource.read().unwrap(), "session-1");
//! id.set(2);
//! assert_eq!(resource.read().unwrap(), "session-2");
//! assert_eq!(released.load(Ordering::SeqCst), 1);
//! ```

pub mod graph;
pub mod reactive;
pub mod resource;

mod config;
mod error;
mod registry;
mod runtime;
mod spawner;

pub use config::{RuntimeConfig, TeardownPolicy};
pub use error::{ConfigError, OwnershipError, ResourceError, SpawnError};
pub use registry::DefinitionStats;
pub use resource::{current_node, on_cleanup};
pub use runtime::{Runtime, RuntimeBuilder};
pub use spawner::{Spawner, TokioSpawner};
