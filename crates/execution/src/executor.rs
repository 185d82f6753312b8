//! Serialized out-of-band execution on one chain instance.
//!
//! # Design
//!
//! Every invocation that does not come from the deterministic block
//! pipeline (timers, inbound peer messages, reentrant calls, node hooks)
//! runs through the chain's `ActionExecutor`:
//!
//! ```text
//! execute(height) ──► HeaderSource ──┐
//! execute_with_mock_header() ────────┤
//!                                    ▼
//!                          execute_with_header()
//!                                    │
//!          lock ─► build ctx ─► before hook ─► callback ─► after hook
//!                                    │
//!                      callback Ok ──┴── callback Err
//!                           │                 │
//!                    commit ctx         discard ctx
//! ```
//!
//! The lock is FIFO-fair, so commits happen in lock-acquisition order. A
//! callback must never re-enter the executor of its own chain: it would wait
//! on the lock it is holding.

use crate::{ExecutionHooks, ExecutorError};
use futures::future::BoxFuture;
use polychain_core::InvocationError;
use polychain_engine::{ChainInstance, ExecutionContext, ExecutionContextBuilder, HeaderSource};
use polychain_types::BlockHeader;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Runs contract-invocation callbacks on one chain instance under exclusive
/// access, committing only on success.
pub struct ActionExecutor {
    chain: ChainInstance,
    builder: ExecutionContextBuilder,
    headers: Arc<dyn HeaderSource>,
    hooks: Option<Arc<dyn ExecutionHooks>>,
    lock: Mutex<()>,
}

impl ActionExecutor {
    /// Create an executor for `chain`.
    pub fn new(chain: ChainInstance, headers: Arc<dyn HeaderSource>) -> Self {
        Self {
            chain,
            builder: ExecutionContextBuilder::new(),
            headers,
            hooks: None,
            lock: Mutex::new(()),
        }
    }

    /// Install lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Chain this executor serializes.
    pub fn chain(&self) -> &ChainInstance {
        &self.chain
    }

    /// Run `callback` against the state at `height` (0 = latest).
    pub async fn execute<T, F>(
        &self,
        parent: &CancellationToken,
        height: i64,
        callback: F,
    ) -> Result<T, ExecutorError>
    where
        F: for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, Result<T, InvocationError>> + Send,
        T: Send,
    {
        let header = self.headers.header_by_height(&self.chain, height).await?;
        self.execute_with_header(parent, header, callback).await
    }

    /// Run `callback` against a header synthesized from the current tip.
    pub async fn execute_with_mock_header<T, F>(
        &self,
        parent: &CancellationToken,
        callback: F,
    ) -> Result<T, ExecutorError>
    where
        F: for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, Result<T, InvocationError>> + Send,
        T: Send,
    {
        let header = self.builder.mock_header(&self.chain);
        self.execute_with_header(parent, header, callback).await
    }

    /// Run `callback` against the state at `header`.
    #[instrument(skip_all, fields(chain_id = %self.chain.id(), height = header.height))]
    pub async fn execute_with_header<T, F>(
        &self,
        parent: &CancellationToken,
        header: BlockHeader,
        callback: F,
    ) -> Result<T, ExecutorError>
    where
        F: for<'a> FnOnce(&'a mut ExecutionContext) -> BoxFuture<'a, Result<T, InvocationError>> + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;

        let mut ctx = self
            .builder
            .build_from_header(&self.chain, &header, false, parent.child_token())?;

        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.before_execute(&mut ctx).await {
                warn!(error = %e, "Pre-execution hook failed");
            }
        }

        let result = callback(&mut ctx).await;

        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.after_execute(&mut ctx, result.as_ref().err()).await {
                warn!(error = %e, "Post-execution hook failed");
            }
        }

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Callback failed, discarding context");
                return Err(e.into());
            }
        };

        self.builder.commit(&self.chain, ctx)?;
        Ok(value)
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("chain_id", self.chain.id())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}
