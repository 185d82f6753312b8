//! Background launching of timeouts, inbound messages and reentry.
//!
//! # Lifecycle
//!
//! Every launched job walks the same state machine:
//!
//! ```text
//! Requested ──► Scheduled ──► Running ──► Completed
//!     │             │                 └─► Failed
//!     │             ├─► Cancelled            (timeouts only)
//!     └─────────────┴─► SkippedAtShutdown
//! ```
//!
//! `start_*` returns immediately; the job runs on its own task and reports
//! nothing to the requester. Timeouts are registered under their
//! [`TimeoutKey`] before the task waits, so a cancel issued right after
//! the start always finds them. Failures are logged. The shutdown sentinel
//! ([`InvocationError::Shutdown`]) counts as a normal completion.

use crate::tasks::{race, RaceOutcome, SupervisedTask};
use crate::{LaunchError, LauncherConfig};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use polychain_core::{EntryPoint, Invocation, InvocationError, RequestId, TimeoutKey};
use polychain_engine::{ContractEngine, ExecutionContext};
use polychain_execution::{ActionExecutor, ExecutorError};
use polychain_types::{BlockHeight, ChainId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A contract asking to be called back after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutRequest {
    /// Contract scheduling the timeout; it receives the callback.
    pub sender: String,
    pub request_id: RequestId,
    pub delay: Duration,
    pub payload: Vec<u8>,
}

/// A message from a peer addressed to a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub contract: String,
    pub sender: String,
    pub payload: Vec<u8>,
}

/// A contract calling one of its own named entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReentryRequest {
    pub contract: String,
    pub caller: String,
    pub entry_point: String,
    pub payload: Vec<u8>,
}

/// Terminal state of a launched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The entry point ran, or stopped on the shutdown sentinel.
    Completed,
    /// The entry point or its execution failed.
    Failed(ExecutorError),
    /// The timeout was cancelled before it fired.
    Cancelled,
    /// The node was shutting down; the entry point never ran.
    SkippedAtShutdown,
}

struct Registration {
    id: u64,
    cancel: CancellationToken,
}

/// Launches out-of-band jobs for one chain instance.
pub struct AsyncTaskLauncher {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<ActionExecutor>,
    engine: Arc<dyn ContractEngine>,
    shutdown: CancellationToken,
    config: LauncherConfig,
    timeouts: DashMap<TimeoutKey, Registration>,
    next_registration: AtomicU64,
}

impl AsyncTaskLauncher {
    /// Create a launcher running jobs through `executor`.
    ///
    /// `shutdown` is the node-wide shutdown signal.
    pub fn new(
        executor: Arc<ActionExecutor>,
        engine: Arc<dyn ContractEngine>,
        shutdown: CancellationToken,
        config: LauncherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                engine,
                shutdown,
                config,
                timeouts: DashMap::new(),
                next_registration: AtomicU64::new(0),
            }),
        }
    }

    /// Chain this launcher serves.
    pub fn chain_id(&self) -> &ChainId {
        self.inner.executor.chain().id()
    }

    /// Number of registered timeouts that have neither fired nor been
    /// cancelled.
    pub fn active_timeouts(&self) -> usize {
        self.inner.timeouts.len()
    }

    /// Schedule the timed entry point of `request.sender` after
    /// `request.delay`.
    pub fn start_timeout(
        &self,
        parent: &CancellationToken,
        request: TimeoutRequest,
    ) -> SupervisedTask<TaskOutcome> {
        let inner = self.inner.clone();
        let parent = parent.clone();
        let key = TimeoutKey::new(self.chain_id().clone(), request.sender.clone(), request.request_id);
        let cancel = CancellationToken::new();

        if inner.shutdown.is_cancelled() {
            return SupervisedTask::spawn_with(cancel, move |_| async move {
                debug!(key = %key, "Shutdown in progress, timeout not scheduled");
                TaskOutcome::SkippedAtShutdown
            });
        }

        let id = inner.register(key.clone(), cancel.clone());
        trace!(key = %key, delay_ms = request.delay.as_millis() as u64, "Timeout scheduled");

        SupervisedTask::spawn_with(cancel, move |cancel| async move {
            match race(tokio::time::sleep(request.delay), &cancel, &inner.shutdown).await {
                RaceOutcome::Cancelled => {
                    debug!(key = %key, "Timeout cancelled");
                    TaskOutcome::Cancelled
                }
                RaceOutcome::Shutdown => {
                    inner.unregister(&key, id);
                    debug!(key = %key, "Shutdown in progress, timeout dropped");
                    TaskOutcome::SkippedAtShutdown
                }
                RaceOutcome::Completed(()) => {
                    inner.unregister(&key, id);
                    trace!(key = %key, "Timeout fired");
                    let invocation = Invocation::background(
                        EntryPoint::Timed,
                        request.sender.clone(),
                        request.sender,
                        request.payload,
                    );
                    let result = inner.run_at_tip(&parent, invocation).await;
                    classify(&key.to_string(), result)
                }
            }
        })
    }

    /// Cancel the timeout registered under `key`.
    ///
    /// Returns whether a pending timeout was found.
    pub fn cancel_timeout(&self, key: &TimeoutKey) -> bool {
        match self.inner.timeouts.remove(key) {
            Some((_, registration)) => {
                registration.cancel.cancel();
                debug!(key = %key, "Timeout cancellation requested");
                true
            }
            None => {
                trace!(key = %key, "No pending timeout to cancel");
                false
            }
        }
    }

    /// Deliver a peer message to the message entry point of
    /// `message.contract`.
    pub fn start_inbound_message(
        &self,
        parent: &CancellationToken,
        message: InboundMessage,
    ) -> SupervisedTask<TaskOutcome> {
        let inner = self.inner.clone();
        let parent = parent.clone();
        SupervisedTask::spawn(move |_| async move {
            let label = format!("{}<-{}", message.contract, message.sender);
            if inner.shutdown.is_cancelled() {
                debug!(message = %label, "Shutdown in progress, inbound message dropped");
                return TaskOutcome::SkippedAtShutdown;
            }
            let invocation = Invocation::background(
                EntryPoint::P2pMessage,
                message.contract,
                message.sender,
                message.payload,
            );
            let result = inner
                .executor
                .execute_with_mock_header(&parent, dispatcher(inner.engine.clone(), invocation))
                .await;
            classify(&label, result)
        })
    }

    /// Run a named entry point of `request.contract` in the background.
    pub fn start_reentry(
        &self,
        parent: &CancellationToken,
        request: ReentryRequest,
    ) -> SupervisedTask<TaskOutcome> {
        let inner = self.inner.clone();
        let parent = parent.clone();
        SupervisedTask::spawn(move |_| async move {
            let label = format!("{}::{}", request.contract, request.entry_point);
            if inner.shutdown.is_cancelled() {
                debug!(reentry = %label, "Shutdown in progress, reentry dropped");
                return TaskOutcome::SkippedAtShutdown;
            }
            let result = inner.run_reentry(&parent, request).await;
            classify(&label, result)
        })
    }

    /// Run a named entry point of `request.contract` and wait for its
    /// response.
    pub async fn reentry(
        &self,
        parent: &CancellationToken,
        request: ReentryRequest,
    ) -> Result<Vec<u8>, LaunchError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(LaunchError::ShuttingDown);
        }
        Ok(self.inner.run_reentry(parent, request).await?)
    }
}

impl Inner {
    fn register(&self, key: TimeoutKey, cancel: CancellationToken) -> u64 {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.timeouts.insert(key.clone(), Registration { id, cancel }) {
            debug!(key = %key, "Replacing pending timeout");
            previous.cancel.cancel();
        }
        id
    }

    /// Remove `key` if it still belongs to registration `id`.
    fn unregister(&self, key: &TimeoutKey, id: u64) {
        self.timeouts.remove_if(key, |_, registration| registration.id == id);
    }

    /// Run `invocation` against the latest committed state.
    async fn run_at_tip(
        &self,
        parent: &CancellationToken,
        invocation: Invocation,
    ) -> Result<Vec<u8>, ExecutorError> {
        let tip = self.executor.chain().tip();
        let callback = dispatcher(self.engine.clone(), invocation);
        if tip == BlockHeight::GENESIS && self.config.mock_header_before_first_commit {
            self.executor.execute_with_mock_header(parent, callback).await
        } else {
            self.executor.execute(parent, tip.as_i64(), callback).await
        }
    }

    /// Run a reentry in a scope that shutdown cancels.
    async fn run_reentry(
        &self,
        parent: &CancellationToken,
        request: ReentryRequest,
    ) -> Result<Vec<u8>, ExecutorError> {
        let scope = parent.child_token();
        let _scope_guard = scope.clone().drop_guard();
        {
            let scope = scope.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Shutdown began during reentry, cancelling it");
                        scope.cancel();
                    }
                    _ = scope.cancelled() => {}
                }
            });
        }

        let invocation = Invocation {
            entry_point: EntryPoint::Named(request.entry_point),
            contract: request.contract,
            caller: request.caller,
            payload: request.payload,
            dependencies: Vec::new(),
            background: true,
        };
        self.run_at_tip(&scope, invocation).await
    }
}

impl std::fmt::Debug for AsyncTaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTaskLauncher")
            .field("chain_id", self.chain_id())
            .field("active_timeouts", &self.active_timeouts())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Callback dispatching `invocation` through `engine`.
fn dispatcher(
    engine: Arc<dyn ContractEngine>,
    invocation: Invocation,
) -> impl for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, Result<Vec<u8>, InvocationError>> + Send
{
    move |ctx| async move { engine.invoke_entry_point(ctx, invocation).await }.boxed()
}

fn classify(label: &str, result: Result<Vec<u8>, ExecutorError>) -> TaskOutcome {
    match result {
        Ok(_) => {
            trace!(job = %label, "Background job completed");
            TaskOutcome::Completed
        }
        Err(e) if e.is_shutdown() => {
            debug!(job = %label, "Background job stopped by shutdown");
            TaskOutcome::Completed
        }
        Err(e) => {
            warn!(job = %label, error = %e, "Background job failed");
            TaskOutcome::Failed(e)
        }
    }
}
