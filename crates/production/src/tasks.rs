//! Supervised background tasks.
//!
//! Every fire-and-forget job the node launches (timeouts, inbound messages,
//! reentry) races its work against two signals: its own cancellation handle
//! and the node-wide shutdown token. [`race`] encodes that race once, and
//! [`SupervisedTask`] pairs the spawned task with its cancellation handle.

use crate::LaunchError;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which side of a [`race`] finished first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    /// The work completed with this value.
    Completed(T),
    /// The task's own cancellation handle fired.
    Cancelled,
    /// The node began shutting down.
    Shutdown,
}

/// Run `work` until it completes, `cancel` fires or `shutdown` fires.
///
/// Shutdown wins ties, then cancellation.
pub async fn race<F: Future>(
    work: F,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> RaceOutcome<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => RaceOutcome::Shutdown,
        _ = cancel.cancelled() => RaceOutcome::Cancelled,
        value = work => RaceOutcome::Completed(value),
    }
}

/// A spawned task together with its cancellation handle.
///
/// Dropping the value detaches the task; it keeps running.
#[derive(Debug)]
pub struct SupervisedTask<T> {
    cancel: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> SupervisedTask<T> {
    /// Spawn `task`, handing it a fresh cancellation token.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::spawn_with(CancellationToken::new(), task)
    }

    /// Spawn `task` with an existing cancellation token.
    pub fn spawn_with<F, Fut>(cancel: CancellationToken, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(task(cancel.clone()));
        Self { cancel, handle }
    }

    /// Ask the task to stop. Cooperative: the task decides when.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancellation handle of the task.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task's result.
    pub async fn join(self) -> Result<T, LaunchError> {
        self.handle
            .await
            .map_err(|e| LaunchError::TaskFailed(e.to_string()))
    }
}
