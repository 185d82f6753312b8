//! Canned-response contract engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use polychain_core::{Invocation, InvocationError};
use polychain_engine::{ContractEngine, ExecutionContext};
use std::sync::Arc;
use std::time::Duration;

type Handler =
    Arc<dyn Fn(&mut ExecutionContext, &Invocation) -> Result<Vec<u8>, InvocationError> + Send + Sync>;

/// A `ContractEngine` that answers every invocation from a closure.
///
/// Invocations are recorded when dispatched, before any configured delay,
/// so a test can tell "never fired" apart from "fired but slow". A delayed
/// invocation observes the context's cancellation and returns the shutdown
/// sentinel if it fires first.
pub struct CannedEngine {
    handler: Handler,
    delay: Option<Duration>,
    invocations: Mutex<Vec<Invocation>>,
}

impl CannedEngine {
    /// Engine that echoes the invocation payload.
    pub fn new() -> Self {
        Self::with_handler(|_, invocation| Ok(invocation.payload.clone()))
    }

    /// Engine answering with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&mut ExecutionContext, &Invocation) -> Result<Vec<u8>, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Arc::new(handler),
            delay: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Delay every invocation by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Invocations dispatched so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Number of invocations dispatched so far.
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }
}

impl Default for CannedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContractEngine for CannedEngine {
    async fn invoke_entry_point(
        &self,
        ctx: &mut ExecutionContext,
        invocation: Invocation,
    ) -> Result<Vec<u8>, InvocationError> {
        self.invocations.lock().push(invocation.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation().cancelled() => return Err(InvocationError::Shutdown),
            }
        }
        (self.handler)(ctx, &invocation)
    }
}
