//! Dependency-Tracked Cache
//!
//! This module supplies the change-detection capability the resource engine
//! is built on: mutable cells, recording frames, and memoized caches.
//!
//! # Concepts
//!
//! ## Tracked Cells
//!
//! A [`TrackedCell`] holds mutable state. Reading it inside a recording frame
//! registers it as a dependency of the running computation. Writing it
//! advances the global revision clock.
//!
//! ## Caches
//!
//! A [`Cache`] memoizes a computation. It stores what the computation read
//! and, when next read, recomputes only if one of those reads is now out of
//! date.
//!
//! # Implementation Notes
//!
//! The model is pull-based: writes never notify readers. Each computation
//! keeps a [`Recording`] (its dependency tags plus the clock value when it
//! started) and staleness is decided by comparing revisions at read time.

mod cache;
mod cell;
mod context;
mod tag;

pub use cache::{Cache, CacheState};
pub use cell::TrackedCell;
pub use context::{untracked, TrackingFrame};
pub use tag::{CellTag, Combined, Recording, Revision, Tag, TagRef};
