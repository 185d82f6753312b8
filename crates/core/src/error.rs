//! Errors reported by collaborators invoked out of band.

use thiserror::Error;

/// Failure of an entry-point invocation or a deterministic sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// The node is shutting down. Background paths treat this as benign.
    #[error("Invocation aborted: node is shutting down")]
    Shutdown,

    /// The contract does not exist or does not export the entry point.
    #[error("Entry point {entry_point} not found on {contract}")]
    NotFound {
        contract: String,
        entry_point: String,
    },

    /// The contract ran and failed.
    #[error("Contract execution failed: {0}")]
    Contract(String),

    /// A cross-chain call made by the contract failed.
    #[error("Cross-chain call failed: {0}")]
    CrossChain(String),
}

impl InvocationError {
    /// Whether this is the shutdown sentinel.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, InvocationError::Shutdown)
    }
}
