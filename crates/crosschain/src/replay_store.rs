//! In-memory replay log store.

use dashmap::DashMap;
use polychain_core::ReplayInfoSource;
use polychain_types::{AtomicTxCrossChainCallInfo, ChainId};

/// [`ReplayInfoSource`] backed by a concurrent map.
///
/// The proposer's pre-execution pass fills it; coordinators read from it
/// while replaying. Cleared between atomic transactions.
#[derive(Debug, Default)]
pub struct InMemoryReplayStore {
    entries: DashMap<ChainId, AtomicTxCrossChainCallInfo>,
}

impl InMemoryReplayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every recorded log.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of chains with a recorded log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no log is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReplayInfoSource for InMemoryReplayStore {
    fn replay_info(&self, chain_id: &ChainId) -> Option<AtomicTxCrossChainCallInfo> {
        self.entries.get(chain_id).map(|entry| entry.value().clone())
    }

    fn set_replay_info(&self, chain_id: ChainId, info: AtomicTxCrossChainCallInfo) {
        self.entries.insert(chain_id, info);
    }
}
