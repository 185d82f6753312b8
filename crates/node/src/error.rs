//! Error types for node assembly and operation.

use polychain_crosschain::CoordinatorError;
use polychain_engine::ContextError;
use polychain_production::TelemetryError;
use polychain_types::ChainId;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No chains configured")]
    NoChains,

    #[error("Chain {0} configured twice")]
    DuplicateChain(ChainId),

    #[error("Chain id must not be empty")]
    EmptyChainId,
}

/// Failure of a node operation.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize telemetry: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Chain {0} is not hosted by this node")]
    UnknownChain(ChainId),

    #[error("No chain of the atomic transaction is hosted by this node")]
    NoResidentParticipant,

    #[error("Atomic transaction failed on chain {chain_id}: {source}")]
    AtomicTx {
        chain_id: ChainId,
        #[source]
        source: CoordinatorError,
    },

    #[error("Failed to build context for chain {chain_id}: {source}")]
    Context {
        chain_id: ChainId,
        #[source]
        source: ContextError,
    },
}
