//! Error types for background launching.

use polychain_execution::ExecutorError;
use thiserror::Error;

/// Failure of a launcher call that reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// The node is shutting down; nothing was run.
    #[error("Node is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Execution(#[from] ExecutorError),

    /// The task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}
