//! Core traits shared across crates.

use polychain_types::{AtomicTxCrossChainCallInfo, ChainId};

/// Source of precomputed cross-chain replay metadata.
///
/// A proposer that hosts every chain participating in an atomic transaction
/// records the exact request and response of every cross-chain call, per
/// chain and per sub-transaction. Nodes that lack some participant consume
/// the log to reproduce those effects without executing the missing chain.
///
/// Implementations are read from many tasks concurrently and must be cheap
/// to query.
pub trait ReplayInfoSource: Send + Sync {
    /// Replay log recorded for `chain_id`, if any.
    fn replay_info(&self, chain_id: &ChainId) -> Option<AtomicTxCrossChainCallInfo>;

    /// Store the replay log for `chain_id`, replacing any previous one.
    fn set_replay_info(&self, chain_id: ChainId, info: AtomicTxCrossChainCallInfo);
}
