//! Cache Implementation
//!
//! A cache memoizes a zero-argument computation and knows, at read time,
//! whether anything it read has changed since it last ran.
//!
//! # How Caches Work
//!
//! 1. On first read, the computation runs inside a recording frame and the
//!    result is stored together with the frame's [`Recording`].
//!
//! 2. On later reads, the recording is checked. If no dependency has a newer
//!    revision than the snapshot, the stored value is returned.
//!
//! 3. Otherwise the computation runs again, exactly once, before the read
//!    returns.
//!
//! Staleness is never pushed. A cache whose inputs changed but which is
//! never read again does no work.
//!
//! # Thread Safety
//!
//! The slot is locked for the duration of a recomputation, so concurrent
//! readers on other threads wait for the running computation instead of
//! duplicating it. A read of a cache from inside its own computation on the
//! same thread is reported as a cycle.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::context::TrackingFrame;
use super::tag::{CellTag, Recording, TagRef};
use crate::error::ResourceError;

static CACHE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cache_id() -> u64 {
    CACHE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Freshness of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The stored value is up-to-date.
    Clean,

    /// The next read recomputes.
    Dirty,
}

struct Slot<T> {
    value: Option<T>,
    recording: Option<Recording>,
}

struct CacheInner<T> {
    id: u64,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    slot: Mutex<Slot<T>>,
    /// Touched by `mark_dirty`; included in every recording.
    dirty: Arc<CellTag>,
    computing_on: Mutex<Option<ThreadId>>,
}

/// A memoized computation with automatic dependency tracking.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::{Cache, TrackedCell};
///
/// let count = TrackedCell::new(2);
/// let doubled = Cache::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.read().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.read().unwrap(), 10);
/// ```
pub struct Cache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a computation. Nothing runs until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(CacheInner {
                id: next_cache_id(),
                compute: Box::new(compute),
                slot: Mutex::new(Slot {
                    value: None,
                    recording: None,
                }),
                dirty: Arc::new(CellTag::new()),
                computing_on: Mutex::new(None),
            }),
        }
    }

    /// Get the cache's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the current value, recomputing first if stale.
    ///
    /// If called inside a recording frame, the enclosing computation becomes
    /// dependent on everything this cache read.
    pub fn read(&self) -> Result<T, ResourceError> {
        let current = thread::current().id();
        if *self.inner.computing_on.lock() == Some(current) {
            return Err(ResourceError::Cycle(format!("cache #{}", self.inner.id)));
        }

        let mut slot = self.inner.slot.lock();
        let fresh = matches!(&slot.recording, Some(recording) if !recording.is_stale());

        if !fresh || slot.value.is_none() {
            *self.inner.computing_on.lock() = Some(current);
            let _reset = ResetOnDrop(&self.inner.computing_on);

            let frame = TrackingFrame::enter();
            let value = (self.inner.compute)();
            let recording = frame.finish(Some(self.inner.dirty.clone() as TagRef));

            slot.value = Some(value);
            slot.recording = Some(recording);
        }

        if let Some(recording) = &slot.recording {
            TrackingFrame::track(recording.tag());
        }

        match &slot.value {
            Some(value) => Ok(value.clone()),
            None => Err(ResourceError::Cycle(format!("cache #{}", self.inner.id))),
        }
    }

    /// Check whether the next read recomputes.
    pub fn is_stale(&self) -> bool {
        match &self.inner.slot.lock().recording {
            Some(recording) => recording.is_stale(),
            None => true,
        }
    }

    /// Current freshness.
    pub fn state(&self) -> CacheState {
        if self.is_stale() {
            CacheState::Dirty
        } else {
            CacheState::Clean
        }
    }

    /// Force the next read to recompute.
    pub fn mark_dirty(&self) {
        self.inner.dirty.touch();
    }

    /// Check if the cache has ever produced a value.
    pub fn has_value(&self) -> bool {
        self.inner.slot.lock().value.is_some()
    }
}

struct ResetOnDrop<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("id", &self.inner.id)
            .field("has_value", &self.has_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::TrackedCell;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn cache_computes_on_first_read() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let cache = Cache::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert!(!cache.has_value());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(cache.read().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(cache.has_value());
    }

    #[test]
    fn cache_returns_stored_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();
        let input = TrackedCell::new(1);
        let input_clone = input.clone();

        let cache = Cache::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            input_clone.get()
        });

        assert_eq!(cache.read().unwrap(), 1);
        assert_eq!(cache.read().unwrap(), 1);
        assert_eq!(cache.read().unwrap(), 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), CacheState::Clean);
    }

    #[test]
    fn cache_recomputes_once_after_write() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();
        let input = TrackedCell::new(1);
        let input_clone = input.clone();

        let cache = Cache::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            input_clone.get() * 10
        });

        assert_eq!(cache.read().unwrap(), 10);
        input.set(2);
        assert_eq!(cache.state(), CacheState::Dirty);

        assert_eq!(cache.read().unwrap(), 20);
        assert_eq!(cache.read().unwrap(), 20);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mark_dirty_forces_recompute() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let cache = Cache::new(move || call_count_clone.fetch_add(1, Ordering::SeqCst));

        assert_eq!(cache.read().unwrap(), 0);
        cache.mark_dirty();
        assert_eq!(cache.read().unwrap(), 1);
    }

    #[test]
    fn outer_cache_sees_inner_dependencies() {
        let input = TrackedCell::new(3);
        let inner = Cache::new({
            let input = input.clone();
            move || input.get() + 1
        });
        let outer = Cache::new({
            let inner = inner.clone();
            move || inner.read().unwrap_or_default() * 2
        });

        assert_eq!(outer.read().unwrap(), 8);
        input.set(4);
        assert!(outer.is_stale());
        assert_eq!(outer.read().unwrap(), 10);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let slot: Arc<Mutex<Option<Cache<i32>>>> = Arc::new(Mutex::new(None));
        let observed = Arc::new(Mutex::new(None));

        let cache = Cache::new({
            let slot = slot.clone();
            let observed = observed.clone();
            move || {
                let me = slot.lock().clone();
                if let Some(me) = me {
                    *observed.lock() = Some(me.read().is_err());
                }
                1
            }
        });
        *slot.lock() = Some(cache.clone());

        assert_eq!(cache.read().unwrap(), 1);
        assert_eq!(*observed.lock(), Some(true));
    }
}
