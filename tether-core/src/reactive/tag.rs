//! Revisions and Tags
//!
//! Every dependency in the system is represented by a tag. A tag reports the
//! revision at which it last changed. Staleness is a pull-based comparison:
//! a computation advances the revision clock when it starts and remembers
//! that revision, and it is stale once any tag it read reports a newer one.
//!
//! # Tag Kinds
//!
//! - Cell tags: advanced on every write to a tracked cell.
//! - Combined tags: the dependency set of one finished computation. Its
//!   revision is the maximum over the tags it recorded. Combined tags are
//!   immutable once built, so a consumer that read a computation keeps
//!   observing the exact dependency set of the run it read, even if the
//!   computation later re-runs with different dependencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The global revision clock.
///
/// Starts at 1 so that freshly created cells (revision 0) are never newer
/// than any snapshot.
static CLOCK: AtomicU64 = AtomicU64::new(1);

/// A point on the global revision clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

impl Revision {
    /// The revision reported by tags that have never changed.
    pub const INITIAL: Revision = Revision(0);

    /// Read the clock without advancing it.
    pub fn current() -> Self {
        Self(CLOCK.load(Ordering::SeqCst))
    }

    /// Advance the clock and return the new revision.
    pub(crate) fn bump() -> Self {
        Self(CLOCK.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Get the raw clock value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Anything a computation can depend on.
pub trait Tag: Send + Sync {
    /// The revision at which this dependency last changed.
    fn revision(&self) -> Revision;
}

/// Shared handle to a dependency.
pub type TagRef = Arc<dyn Tag>;

/// Tag owned by a single mutable cell.
#[derive(Debug, Default)]
pub struct CellTag {
    revision: AtomicU64,
}

impl CellTag {
    /// Create a tag that has never changed.
    pub fn new() -> Self {
        Self {
            revision: AtomicU64::new(Revision::INITIAL.0),
        }
    }

    /// Record a change.
    pub fn touch(&self) {
        let revision = Revision::bump();
        self.revision.store(revision.0, Ordering::SeqCst);
    }

    /// Record a change dated at `revision`. Never moves the tag backwards.
    pub(crate) fn touch_at(&self, revision: Revision) {
        self.revision.fetch_max(revision.0, Ordering::SeqCst);
    }
}

impl Tag for CellTag {
    fn revision(&self) -> Revision {
        Revision(self.revision.load(Ordering::SeqCst))
    }
}

/// The frozen dependency set of one finished computation.
pub struct Combined {
    tags: Vec<TagRef>,
}

impl Combined {
    pub(crate) fn new(tags: Vec<TagRef>) -> Self {
        Self { tags }
    }

    /// Number of distinct dependencies recorded.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl Tag for Combined {
    fn revision(&self) -> Revision {
        self.tags
            .iter()
            .map(|tag| tag.revision())
            .max()
            .unwrap_or(Revision::INITIAL)
    }
}

/// What a finished computation observed: its dependencies and the clock
/// value when it started.
#[derive(Clone)]
pub struct Recording {
    combined: Arc<Combined>,
    snapshot: Revision,
}

impl Recording {
    pub(crate) fn new(combined: Combined, snapshot: Revision) -> Self {
        Self {
            combined: Arc::new(combined),
            snapshot,
        }
    }

    /// True once any recorded dependency changed after the snapshot.
    pub fn is_stale(&self) -> bool {
        self.combined.revision() > self.snapshot
    }

    /// The tag a consumer should record when it reads this computation.
    pub fn tag(&self) -> TagRef {
        self.combined.clone()
    }

    /// Clock value at the start of the recorded computation.
    pub fn snapshot(&self) -> Revision {
        self.snapshot
    }

    /// Number of distinct dependencies recorded.
    pub fn dependency_count(&self) -> usize {
        self.combined.len()
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("snapshot", &self.snapshot)
            .field("dependencies", &self.combined.len())
            .finish()
    }
}
