//! Tracking Context
//!
//! The tracking context records which tags a computation reads. This is the
//! "which mutable cells were read" half of the dependency-tracked cache.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a computation pushes a
//! frame; every tracked read appends its tag to the innermost frame. When
//! the computation completes, the frame is popped and its tags are frozen
//! into a [`Recording`].
//!
//! Nested frames do not leak into their parents. A computation that reads
//! another computation records the inner computation's combined tag, which
//! transitively covers everything the inner one read.
//!
//! Entering a frame advances the revision clock, so every frame starts at
//! a distinct revision and anything that finished earlier has an older
//! snapshot than the outermost running frame.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::tag::{Combined, Recording, Revision, TagRef};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the tracking stack.
struct ContextEntry {
    /// Identifies the guard that owns this entry.
    frame_id: u64,
    /// False for frames pushed by [`untracked`].
    tracking: bool,
    snapshot: Revision,
    /// Tags read while this frame was innermost.
    dependencies: Vec<TagRef>,
}

fn next_frame_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Guard for a recording frame.
///
/// The frame is popped when the guard is finished or dropped, so the stack
/// stays balanced even if the computation panics.
pub struct TrackingFrame {
    frame_id: u64,
    snapshot: Revision,
    popped: bool,
}

impl TrackingFrame {
    /// Push a new recording frame.
    pub fn enter() -> Self {
        Self::push(true)
    }

    fn push(tracking: bool) -> Self {
        let frame_id = next_frame_id();
        let snapshot = Revision::bump();
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                frame_id,
                tracking,
                snapshot,
                dependencies: Vec::new(),
            });
        });

        Self {
            frame_id,
            snapshot,
            popped: false,
        }
    }

    /// Check if a recording frame is currently collecting reads.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.tracking)
                .unwrap_or(false)
        })
    }

    /// Record a read of `tag` in the innermost frame.
    pub fn track(tag: TagRef) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.tracking {
                    entry.dependencies.push(tag);
                }
            }
        });
    }

    /// Snapshot of the outermost frame on this thread, if any.
    pub(crate) fn outermost_snapshot() -> Option<Revision> {
        CONTEXT_STACK.with(|stack| stack.borrow().first().map(|entry| entry.snapshot))
    }

    /// Clock value when this frame was entered.
    pub fn snapshot(&self) -> Revision {
        self.snapshot
    }

    /// Pop the frame and freeze what it read.
    ///
    /// `extra` tags are added to the recording as if they had been read.
    pub fn finish(mut self, extra: impl IntoIterator<Item = TagRef>) -> Recording {
        let mut dependencies = self.pop();
        dependencies.extend(extra);
        Recording::new(Combined::new(dedup(dependencies)), self.snapshot)
    }

    fn pop(&mut self) -> Vec<TagRef> {
        self.popped = true;
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            match popped {
                Some(entry) => {
                    debug_assert_eq!(
                        entry.frame_id, self.frame_id,
                        "TrackingFrame mismatch: expected {}, got {}",
                        self.frame_id, entry.frame_id
                    );
                    entry.dependencies
                }
                None => Vec::new(),
            }
        })
    }
}

impl Drop for TrackingFrame {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}

fn dedup(tags: Vec<TagRef>) -> Vec<TagRef> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.into_iter()
        .filter(|tag| seen.insert(Arc::as_ptr(tag) as *const () as usize))
        .collect()
}

/// Run `f` without recording any reads into the enclosing frame.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = TrackingFrame::push(false);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::tag::CellTag;

    fn tag() -> Arc<CellTag> {
        Arc::new(CellTag::new())
    }

    #[test]
    fn frame_collects_reads() {
        assert!(!TrackingFrame::is_active());

        let a = tag();
        let b = tag();
        let frame = TrackingFrame::enter();
        assert!(TrackingFrame::is_active());

        TrackingFrame::track(a.clone());
        TrackingFrame::track(b.clone());
        TrackingFrame::track(a.clone());

        let recording = frame.finish(None);
        assert_eq!(recording.dependency_count(), 2);
        assert!(!TrackingFrame::is_active());
    }

    #[test]
    fn nested_frames_are_isolated() {
        let outer_tag = tag();
        let inner_tag = tag();

        let outer = TrackingFrame::enter();
        TrackingFrame::track(outer_tag.clone());
        {
            let inner = TrackingFrame::enter();
            TrackingFrame::track(inner_tag.clone());
            let recording = inner.finish(None);
            assert_eq!(recording.dependency_count(), 1);
        }
        let recording = outer.finish(None);
        assert_eq!(recording.dependency_count(), 1);

        inner_tag.touch();
        assert!(!recording.is_stale());
        outer_tag.touch();
        assert!(recording.is_stale());
    }

    #[test]
    fn untracked_reads_are_not_recorded() {
        let a = tag();
        let frame = TrackingFrame::enter();
        untracked(|| {
            assert!(!TrackingFrame::is_active());
            TrackingFrame::track(a.clone());
        });
        assert!(TrackingFrame::is_active());
        let recording = frame.finish(None);
        assert_eq!(recording.dependency_count(), 0);
    }

    #[test]
    fn outermost_snapshot_is_the_first_frame() {
        assert!(TrackingFrame::outermost_snapshot().is_none());

        let outer = TrackingFrame::enter();
        let inner = TrackingFrame::enter();
        assert!(inner.snapshot() > outer.snapshot());
        assert_eq!(TrackingFrame::outermost_snapshot(), Some(outer.snapshot()));

        drop(inner);
        drop(outer);
        assert!(TrackingFrame::outermost_snapshot().is_none());
    }

    #[test]
    fn dropped_frame_is_popped() {
        {
            let _frame = TrackingFrame::enter();
            assert!(TrackingFrame::is_active());
        }
        assert!(!TrackingFrame::is_active());
    }
}
