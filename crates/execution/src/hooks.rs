//! Lifecycle hooks around out-of-band invocations.

use async_trait::async_trait;
use polychain_core::InvocationError;
use polychain_engine::ExecutionContext;

/// Advisory hooks run around every `ActionExecutor` callback.
///
/// Hook failures are logged and never abort the invocation.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Runs after the context is built, before the callback.
    async fn before_execute(&self, ctx: &mut ExecutionContext) -> Result<(), InvocationError> {
        let _ = ctx;
        Ok(())
    }

    /// Runs after the callback with its error, if any. Writes made here are
    /// committed together with the callback's writes on success.
    async fn after_execute(
        &self,
        ctx: &mut ExecutionContext,
        error: Option<&InvocationError>,
    ) -> Result<(), InvocationError> {
        let _ = (ctx, error);
        Ok(())
    }
}
