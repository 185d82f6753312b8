//! Shared domain types for polychain.
//!
//! This crate holds the data model that every other crate speaks:
//!
//! - [`Hash`], [`ChainId`], [`BlockHeight`] identifiers
//! - [`BlockHeader`] / [`CommitInfo`] binding execution contexts to chain state
//! - cross-chain call requests, responses and replay metadata
//! - [`ExecTxResult`] and [`Event`] produced by sub-transactions
//! - the atomic transaction request/response and the sub-transaction envelope
//!
//! Types here carry no behaviour beyond hashing, comparison and encoding.

mod block;
mod crosschain;
mod hash;
mod identifiers;
mod result;
mod transaction;

pub use block::{BlockHeader, CommitInfo, MOCK_PROPOSER};
pub use crosschain::{
    AtomicTxCrossChainCallInfo, CallKey, Coin, CrossChainCall, CrossChainCallRequest,
    CrossChainCallRequestIndexed, CrossChainCallResponse, CrossChainCallResponseIndexed,
    RequestField, SubTxCallInfo,
};
pub use hash::Hash;
pub use identifiers::{BlockHeight, ChainId};
pub use result::{Event, EventAttribute, ExecTxResult, CODE_OK};
pub use transaction::{AtomicTxRequest, AtomicTxResponse, EnvelopeError, SubTxEnvelope};
