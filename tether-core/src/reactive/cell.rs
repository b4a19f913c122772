//! Tracked Cell Implementation
//!
//! A tracked cell is the mutable-state primitive the cache engine observes.
//! It holds a value and a tag.
//!
//! # How Cells Work
//!
//! 1. When a cell is read inside a recording frame, the cell's tag is
//!    recorded as a dependency of the running computation.
//!
//! 2. When a cell is written, its tag advances to a fresh revision.
//!
//! 3. Nothing is pushed to readers. A computation discovers the write the
//!    next time somebody asks whether it is stale.
//!
//! # Thread Safety
//!
//! The value is protected by a `parking_lot::RwLock` and the tag is atomic,
//! so cells can be shared across threads.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::TrackingFrame;
use super::tag::{CellTag, Revision, Tag};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A mutable value whose reads are recorded by the tracking context.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::TrackedCell;
///
/// let count = TrackedCell::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct TrackedCell<T> {
    id: u64,
    value: Arc<RwLock<T>>,
    tag: Arc<CellTag>,
}

impl<T> TrackedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_cell_id(),
            value: Arc::new(RwLock::new(value)),
            tag: Arc::new(CellTag::new()),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value, recording the read in the active frame.
    pub fn get(&self) -> T {
        TrackingFrame::track(self.tag.clone());
        self.value.read().clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value. Every computation that read this cell is stale
    /// from now on.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.tag.touch();
    }

    /// Replace the value, dating the write to the start of the outermost
    /// frame on this thread. Frames still running there do not see it as a
    /// change; computations that finished before them do. Outside any frame
    /// this is [`set`](Self::set).
    pub(crate) fn set_within_frames(&self, value: T) {
        *self.value.write() = value;
        match TrackingFrame::outermost_snapshot() {
            Some(snapshot) => self.tag.touch_at(snapshot),
            None => self.tag.touch(),
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut guard = self.value.write();
        let next = f(&guard);
        *guard = next;
        drop(guard);
        self.tag.touch();
    }

    /// Revision of the last write.
    pub fn revision(&self) -> Revision {
        self.tag.revision()
    }
}

impl<T> Clone for TrackedCell<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            tag: Arc::clone(&self.tag),
        }
    }
}

impl<T> Debug for TrackedCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCell")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("revision", &self.revision())
            .finish()
    }
}
