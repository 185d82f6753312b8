//! Error types for chain state access.

use polychain_types::ChainId;
use thiserror::Error;

/// A requested height cannot back an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHeightError {
    /// Heights are never negative.
    #[error("Invalid height {height}: height must not be negative")]
    Negative { height: i64 },

    /// The chain has not committed a block yet.
    #[error("Chain {chain_id} is not ready: no block committed yet")]
    NotReady { chain_id: ChainId },

    /// The height is beyond the chain tip.
    #[error("Invalid height {height}: chain tip is {tip}")]
    Future { height: i64, tip: u64 },

    /// Proofs need a committed parent, so heights 0 and 1 cannot be proven.
    #[error("Cannot produce proofs at height {height}: height must be greater than 1")]
    ProofUnavailable { height: i64 },
}

/// Failure resolving a header for a height.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error(transparent)]
    InvalidHeight(#[from] InvalidHeightError),

    /// The height is valid but its header was not recorded.
    #[error("No header recorded for chain {chain_id} at height {height}")]
    Missing { chain_id: ChainId, height: u64 },
}

/// Failure building or committing an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error(transparent)]
    InvalidHeight(#[from] InvalidHeightError),

    /// State for a valid height is no longer retained.
    #[error("State of chain {chain_id} at height {height} is not available")]
    StateUnavailable { chain_id: ChainId, height: u64 },

    /// A context was committed into a chain it was not built from.
    #[error("Context for chain {context} cannot be committed into chain {chain}")]
    ChainMismatch { context: ChainId, chain: ChainId },
}

/// Chain lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Chain {0} is not hosted by this node")]
    UnknownChain(ChainId),
}
