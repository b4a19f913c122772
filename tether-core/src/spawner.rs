//! Task spawning for pending resolutions.
//!
//! The engine never blocks on an asynchronous computation. The future is
//! handed to a [`Spawner`], and its completion commits the result later.
//! A spawner that cannot take the future returns a [`SpawnError`], and the
//! resource records the invocation as rejected.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::SpawnError;

/// Drives futures produced by asynchronous resources.
pub trait Spawner: Send + Sync {
    /// Run `task` to completion in the background.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpawnError>;
}

/// Spawns onto a tokio runtime.
///
/// Join handles are kept so a host can wait for every in-flight resolution
/// with [`TokioSpawner::join_all`].
#[derive(Default)]
pub struct TokioSpawner {
    handle: Option<Handle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioSpawner {
    /// Spawn onto whichever tokio runtime is current at spawn time.
    ///
    /// Spawning from a thread with no current runtime fails with
    /// [`SpawnError::NoRuntime`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Number of spawned tasks not yet joined.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait for every spawned task, including tasks spawned while waiting.
    pub async fn join_all(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    tracing::warn!(error = %err, "pending resolution task failed");
                }
            }
        }
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        let handle = self
            .handle
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(SpawnError::NoRuntime)?;
        let join = handle.spawn(task);
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(join);
        Ok(())
    }
}

impl std::fmt::Debug for TokioSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSpawner")
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}
