//! Block header type used to bind out-of-band execution contexts.

use crate::{ChainId, Hash};
use serde::{Deserialize, Serialize};

/// Placeholder proposer recorded on synthesized headers.
pub const MOCK_PROPOSER: &str = "proposer";

/// Block header an execution context is bound to.
///
/// Out-of-band invocations never produce blocks; they only need the chain
/// position and time of the state they run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain the header belongs to.
    pub chain_id: ChainId,

    /// Height in the chain. Signed because query heights arrive unchecked.
    pub height: i64,

    /// Unix timestamp (milliseconds). Zero means "unknown".
    pub timestamp_ms: u64,

    /// Application state hash committed at this height.
    pub app_hash: Hash,

    /// Proposer of the block.
    pub proposer: String,
}

impl BlockHeader {
    /// Compute hash of this block header.
    pub fn hash(&self) -> Hash {
        Hash::from_parts(&[
            self.chain_id.as_str().as_bytes(),
            &self.height.to_le_bytes(),
            &self.timestamp_ms.to_le_bytes(),
            self.app_hash.as_bytes(),
            self.proposer.as_bytes(),
        ])
    }

    /// Whether the header carries a timestamp.
    pub fn has_time(&self) -> bool {
        self.timestamp_ms != 0
    }
}

/// Commit information recorded for every committed height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Committed height.
    pub height: u64,

    /// Block time of the commit (milliseconds).
    pub timestamp_ms: u64,

    /// Application hash after the commit.
    pub app_hash: Hash,
}
