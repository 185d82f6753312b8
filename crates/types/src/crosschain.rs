//! Cross-chain call types and precomputed replay metadata.
//!
//! A cross-chain call is a synchronous contract invocation that one chain
//! instance makes on another while an atomic transaction is in flight. Nodes
//! that host every participating chain execute these calls for real; nodes
//! that lack a participant replay the request/response log captured by the
//! proposer ([`AtomicTxCrossChainCallInfo`]).

use crate::{ChainId, ExecTxResult, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Funds attached to a cross-chain call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

/// A cross-chain call as issued by the calling contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainCallRequest {
    /// Calling contract.
    pub from: String,

    /// Chain the call originates on.
    pub from_chain_id: ChainId,

    /// Target contract.
    pub to: String,

    /// Chain the call targets.
    pub to_chain_id: ChainId,

    /// Opaque payload for the target entry point.
    pub msg: Vec<u8>,

    /// Query calls run against a discardable branch of the target context.
    pub is_query: bool,

    /// Deadline enforced by the caller only. Must be non-zero.
    pub timeout_ms: u64,

    /// Contracts the target execution may touch.
    pub dependencies: Vec<String>,

    /// Funds moved with the call.
    pub funds: Vec<Coin>,
}

/// Fields of a [`CrossChainCallRequest`] that replay compares byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestField {
    From,
    FromChainId,
    To,
    ToChainId,
    IsQuery,
    Msg,
    Dependencies,
    Funds,
}

impl fmt::Display for RequestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestField::From => "from",
            RequestField::FromChainId => "from_chain_id",
            RequestField::To => "to",
            RequestField::ToChainId => "to_chain_id",
            RequestField::IsQuery => "is_query",
            RequestField::Msg => "msg",
            RequestField::Dependencies => "dependencies",
            RequestField::Funds => "funds",
        };
        f.write_str(name)
    }
}

impl CrossChainCallRequest {
    /// First field in which `self` differs from `recorded`, if any.
    ///
    /// `timeout_ms` is a local scheduling parameter and is not part of the
    /// replayed call identity.
    pub fn first_mismatch(&self, recorded: &CrossChainCallRequest) -> Option<RequestField> {
        if self.from != recorded.from {
            return Some(RequestField::From);
        }
        if self.from_chain_id != recorded.from_chain_id {
            return Some(RequestField::FromChainId);
        }
        if self.to != recorded.to {
            return Some(RequestField::To);
        }
        if self.to_chain_id != recorded.to_chain_id {
            return Some(RequestField::ToChainId);
        }
        if self.is_query != recorded.is_query {
            return Some(RequestField::IsQuery);
        }
        if self.msg != recorded.msg {
            return Some(RequestField::Msg);
        }
        if self.dependencies != recorded.dependencies {
            return Some(RequestField::Dependencies);
        }
        if self.funds != recorded.funds {
            return Some(RequestField::Funds);
        }
        None
    }
}

/// Result of a cross-chain call.
///
/// A failure inside the target contract is carried in `error`; it is a
/// normal response, not a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainCallResponse {
    pub data: Vec<u8>,
    pub error: String,
}

impl CrossChainCallResponse {
    /// Successful response carrying `data`.
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            data,
            error: String::new(),
        }
    }

    /// Response reporting a failure in the target execution.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            error: error.into(),
        }
    }

    /// Whether the target execution failed.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Identity of one cross-chain call inside an atomic transaction.
///
/// `index` is the caller's `InternalCrossTxIndex` under `sub_tx_index`; it is
/// the key replay metadata is indexed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey {
    pub atomic_tx: Hash,
    pub from_chain_id: ChainId,
    pub sub_tx_index: usize,
    pub index: usize,
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/subtx={}/call={}",
            self.atomic_tx, self.from_chain_id, self.sub_tx_index, self.index
        )
    }
}

/// A request travelling on a target chain's cross-call-request channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainCallRequestIndexed {
    pub key: CallKey,
    pub request: CrossChainCallRequest,
}

/// A response travelling on a target chain's cross-call-response channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainCallResponseIndexed {
    pub key: CallKey,
    pub response: CrossChainCallResponse,
}

/// One captured cross-chain call: the exact request and the response it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainCall {
    pub request: CrossChainCallRequest,
    pub response: CrossChainCallResponse,
}

/// Captured execution of one sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTxCallInfo {
    /// Result the sub-transaction produced on its target chain.
    pub result: ExecTxResult,

    /// Every cross-chain call observed by the chain, in index order.
    pub calls: Vec<CrossChainCall>,
}

/// Proposer-produced replay log for one chain, indexed by sub-tx.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTxCrossChainCallInfo {
    pub subtx: Vec<SubTxCallInfo>,
}

impl AtomicTxCrossChainCallInfo {
    /// Captured data for sub-transaction `index`.
    pub fn sub_tx(&self, index: usize) -> Option<&SubTxCallInfo> {
        self.subtx.get(index)
    }
}
