//! Async Resolution
//!
//! An asynchronous definition's computation returns a future instead of a
//! value. The instance's value is an [`AsyncValue`] handle that reports
//! `Pending` from the moment the computation is invoked, and the future is
//! driven by the runtime's spawner. When it completes, a
//! [`PendingResolution`] tries to commit the outcome.
//!
//! # Commit rules
//!
//! A resolution commits only if both hold at completion time:
//!
//! 1. the instance that started it is still alive in the ownership graph;
//! 2. no later invocation of the same lifecycle manager has started since.
//!
//! Otherwise the outcome is dropped. The liveness check and the write are
//! done while holding the graph lock, so a concurrent `destroy` either
//! happens entirely before the commit (and the commit is dropped) or
//! entirely after it.
//!
//! Destroying an instance does not cancel its future. A computation that
//! needs cancellation registers an abort with `on_cleanup`.
//!
//! # Observing the transition to `Pending`
//!
//! The write that enters `Pending` is dated to the start of the outermost
//! recording frame on the invoking thread. The computations that triggered
//! the invocation therefore finish fresh, while anything that read the
//! previous state before them goes stale. Only a committed outcome is a
//! new change to the invoking computations.
//!
//! A replace-discipline host that embeds an asynchronous resource builds a
//! fresh nested instance on every run, and each fresh instance starts a
//! new invocation. A host that wants to follow the resolution without
//! re-running its setup reads the value from a deferred read
//! ([`Definition::deferred`]).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use super::definition::Definition;
use super::hooks::Hooks;
use crate::graph::{NodeId, OwnershipGraph};
use crate::reactive::TrackedCell;

/// Progress of an asynchronous computation.
#[derive(Debug, Clone)]
pub enum AsyncState<T> {
    /// Never invoked.
    Unstarted,

    /// Invoked, waiting for the latest invocation to settle.
    Pending,

    /// The latest invocation succeeded.
    Resolved(T),

    /// The latest invocation failed.
    Rejected(Arc<anyhow::Error>),
}

/// How a settled resolution was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The outcome was written.
    Committed,

    /// A later invocation started first; the outcome was dropped.
    Superseded,

    /// The originating instance was destroyed; the outcome was dropped.
    OwnerDestroyed,
}

/// Shared state of one lifecycle manager's asynchronous computation.
pub(crate) struct AsyncSlot<T> {
    state: TrackedCell<AsyncState<T>>,
    latest: Mutex<u64>,
}

impl<T> AsyncSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            state: TrackedCell::new(AsyncState::Unstarted),
            latest: Mutex::new(0),
        }
    }

    /// Start a new invocation on behalf of `node`.
    pub(crate) fn begin(self: &Arc<Self>, graph: OwnershipGraph, node: NodeId) -> PendingResolution<T> {
        let invocation = {
            let mut latest = self.latest.lock();
            *latest += 1;
            self.state.set_within_frames(AsyncState::Pending);
            *latest
        };
        tracing::trace!(%node, invocation, "async computation started");
        PendingResolution {
            slot: Arc::clone(self),
            graph,
            node,
            invocation,
        }
    }

    /// Record that the invocation just begun could not be handed to a
    /// spawner. Dated like the transition to `Pending`.
    fn reject_unspawned(&self, err: anyhow::Error) {
        let _latest = self.latest.lock();
        self.state.set_within_frames(AsyncState::Rejected(Arc::new(err)));
    }
}

/// One in-flight asynchronous computation.
pub struct PendingResolution<T> {
    slot: Arc<AsyncSlot<T>>,
    graph: OwnershipGraph,
    node: NodeId,
    invocation: u64,
}

impl<T> PendingResolution<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The instance that started this resolution.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Position of this invocation within its lifecycle manager, from 1.
    pub fn invocation(&self) -> u64 {
        self.invocation
    }

    /// Await `operation` and commit its outcome.
    pub async fn settle<F>(self, operation: F) -> CommitOutcome
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let outcome = operation.await;
        self.commit(outcome)
    }

    /// Commit `outcome` if the originating instance is alive and no later
    /// invocation has started.
    pub fn commit(self, outcome: anyhow::Result<T>) -> CommitOutcome {
        let Self {
            slot,
            graph,
            node,
            invocation,
        } = self;

        let committed = graph.with_live(node, || {
            let latest = slot.latest.lock();
            if *latest != invocation {
                return CommitOutcome::Superseded;
            }
            slot.state.set(match outcome {
                Ok(value) => AsyncState::Resolved(value),
                Err(err) => AsyncState::Rejected(Arc::new(err)),
            });
            CommitOutcome::Committed
        });

        match committed {
            Some(CommitOutcome::Committed) => {
                tracing::debug!(%node, invocation, "committed async result");
                CommitOutcome::Committed
            }
            Some(other) => {
                tracing::warn!(%node, invocation, "discarded async result from a superseded invocation");
                other
            }
            None => {
                tracing::warn!(%node, invocation, "discarded async result for a destroyed instance");
                CommitOutcome::OwnerDestroyed
            }
        }
    }
}

impl<T> fmt::Debug for PendingResolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResolution")
            .field("node", &self.node)
            .field("invocation", &self.invocation)
            .finish()
    }
}

/// Value of an asynchronous resource.
///
/// All accessors are tracked reads: a computation or cache that inspects the
/// value becomes stale when a resolution is committed.
pub struct AsyncValue<T> {
    slot: Arc<AsyncSlot<T>>,
    invocation: u64,
}

impl<T> AsyncValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Current state.
    pub fn state(&self) -> AsyncState<T> {
        self.slot.state.get()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state(), AsyncState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state(), AsyncState::Resolved(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state(), AsyncState::Rejected(_))
    }

    /// The resolved value, if the latest invocation succeeded.
    pub fn value(&self) -> Option<T> {
        match self.state() {
            AsyncState::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if the latest invocation was rejected.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        match self.state() {
            AsyncState::Rejected(err) => Some(err),
            _ => None,
        }
    }

    /// Invocation that produced this handle.
    pub fn invocation(&self) -> u64 {
        self.invocation
    }
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            invocation: self.invocation,
        }
    }
}

impl<T> fmt::Debug for AsyncValue<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue")
            .field("invocation", &self.invocation)
            .field("state", &self.slot.state.get_untracked())
            .finish()
    }
}

impl<A, T> Definition<A, AsyncValue<T>>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// A replace-discipline definition whose computation returns a future.
    ///
    /// The state turns `Pending` before `compute` is called. The future runs
    /// on the runtime's spawner and its outcome is committed only if it
    /// belongs to the most recent invocation and the instance is still
    /// alive. If the spawner refuses the future (the default
    /// [`TokioSpawner`](crate::TokioSpawner) outside a tokio runtime), the
    /// invocation is `Rejected` with a [`SpawnError`](crate::SpawnError).
    pub fn asynchronous<F, Fut>(compute: F) -> Self
    where
        F: Fn(&Hooks<'_>, &A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::replace(move |hooks, args| {
            let slot = hooks.async_slot::<T>();
            let resolution = slot.begin(hooks.graph().clone(), hooks.node());
            let invocation = resolution.invocation();
            let operation = compute(hooks, args);
            let spawned = hooks.spawn(async move {
                resolution.settle(operation).await;
            });
            if let Err(err) = spawned {
                tracing::warn!(node = %hooks.node(), invocation, error = %err, "async computation not started");
                slot.reject_unspawned(anyhow::Error::new(err));
            }
            Ok(AsyncValue { slot, invocation })
        })
    }
}
