//! Request tracking for out-of-band invocations.

use polychain_types::ChainId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier a contract attaches to a request it schedules.
///
/// Contracts pick their own ids; uniqueness is only required per
/// (chain, sender) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a registered timeout: (chain id, sender contract, request id).
///
/// The launcher maps each key to the cancellation handle of the waiting
/// task. A cancel request carrying the same key finds and fires it.
///
/// # Example
///
/// ```ignore
/// let key = TimeoutKey::new("chain_1", "scheduler", RequestId(7));
/// launcher.start_timeout(&shutdown, request_for(key.clone()));
/// launcher.cancel_timeout(&key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutKey {
    pub chain_id: ChainId,
    pub sender: String,
    pub request_id: RequestId,
}

impl TimeoutKey {
    /// Create a key.
    pub fn new(chain_id: impl Into<ChainId>, sender: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            chain_id: chain_id.into(),
            sender: sender.into(),
            request_id,
        }
    }
}

impl fmt::Display for TimeoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.chain_id, self.sender, self.request_id)
    }
}
