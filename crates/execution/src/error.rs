//! Error types for out-of-band execution.

use polychain_core::InvocationError;
use polychain_engine::{ContextError, HeaderError};
use thiserror::Error;

/// Failure of an `ActionExecutor` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// No header could be resolved for the requested height.
    #[error("Header resolution failed: {0}")]
    Header(#[from] HeaderError),

    /// The execution context could not be built or committed.
    #[error("Execution context failed: {0}")]
    Context(#[from] ContextError),

    /// The callback failed; nothing was committed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl ExecutorError {
    /// Whether the failure is the shutdown sentinel.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ExecutorError::Invocation(e) if e.is_shutdown())
    }
}
