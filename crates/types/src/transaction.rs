//! Atomic transaction request/response and the sub-transaction envelope.
//!
//! An atomic transaction is a batch of raw sub-transactions. Each raw
//! sub-transaction is a JSON-encoded [`SubTxEnvelope`] naming the chain it
//! targets; the body is opaque to the coordinator and handed to the target
//! chain's deterministic pipeline unchanged.

use crate::{ChainId, ExecTxResult, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a raw sub-transaction.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The bytes are not a valid envelope.
    #[error("Malformed sub-transaction envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope names no target chain.
    #[error("Sub-transaction envelope has an empty chain id")]
    EmptyChainId,
}

/// Envelope carried by every raw sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTxEnvelope {
    /// Chain the sub-transaction executes on.
    pub chain_id: ChainId,

    /// Transaction body understood by the target chain.
    pub body: Vec<u8>,
}

impl SubTxEnvelope {
    /// Create an envelope.
    pub fn new(chain_id: impl Into<ChainId>, body: Vec<u8>) -> Self {
        Self {
            chain_id: chain_id.into(),
            body,
        }
    }

    /// Encode to the raw bytes carried in an [`AtomicTxRequest`].
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of strings and byte vectors cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode raw sub-transaction bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: SubTxEnvelope = serde_json::from_slice(raw)?;
        if envelope.chain_id.as_str().is_empty() {
            return Err(EnvelopeError::EmptyChainId);
        }
        Ok(envelope)
    }
}

/// A batch of sub-transactions that succeed or fail as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTxRequest {
    /// Authorized chain ids. Empty means "derive from the sub-transactions".
    pub chain_ids: Vec<ChainId>,

    /// Raw sub-transactions, executed in order.
    pub txs: Vec<Vec<u8>>,
}

impl AtomicTxRequest {
    /// Hash identifying this atomic transaction on every participating chain.
    pub fn hash(&self) -> Hash {
        // The chain id count fixes where the transactions begin.
        let count = (self.chain_ids.len() as u64).to_le_bytes();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.chain_ids.len() + self.txs.len() + 1);
        parts.push(&count);
        for chain_id in &self.chain_ids {
            parts.push(chain_id.as_str().as_bytes());
        }
        for tx in &self.txs {
            parts.push(tx);
        }
        Hash::from_parts(&parts)
    }
}

/// Results of an atomic transaction, one per sub-transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTxResponse {
    pub results: Vec<ExecTxResult>,
}
