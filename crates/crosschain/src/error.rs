//! Error types for atomic transaction coordination.

use polychain_core::InvocationError;
use polychain_types::{ChainId, EnvelopeError, Hash, RequestField};
use thiserror::Error;

/// Replay metadata is missing, out of range or disagrees with execution.
///
/// Always fatal to the sub-transaction or call: it signals either a bug or
/// an exploit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeterminismError {
    #[error("No cross-chain replay info recorded for chain {chain_id}")]
    MissingReplayInfo { chain_id: ChainId },

    #[error("Replay info has {available} sub-transactions, sub-transaction {sub_tx} requested")]
    SubTxOutOfRange { sub_tx: usize, available: usize },

    #[error("Replay info of sub-transaction {sub_tx} has {available} calls, call {index} requested")]
    CallOutOfRange {
        sub_tx: usize,
        index: usize,
        available: usize,
    },

    #[error("Cross-chain request mismatch at index {index}: field {field} differs")]
    RequestMismatch { index: usize, field: RequestField },

    #[error("Cross-chain response mismatch at index {index}")]
    ResponseMismatch { index: usize },
}

/// A chain id outside the authorized set of the in-flight transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Chain {chain_id} is not authorized for atomic transaction (authorized: {authorized:?})")]
pub struct UnauthorizedChainError {
    pub chain_id: ChainId,
    pub authorized: Vec<ChainId>,
}

/// A cross-chain call got no response in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cross-chain call to {chain_id} timed out after {timeout_ms}ms")]
pub struct TimeoutError {
    pub chain_id: ChainId,
    pub timeout_ms: u64,
}

/// Failure of an atomic transaction or of a cross-chain call.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A different atomic transaction is already in flight.
    #[error("Atomic transaction {incoming} conflicts with in-flight transaction {current}")]
    HashMismatch { current: Hash, incoming: Hash },

    /// The authorized chain set disagrees with the in-flight one.
    #[error("Authorized chain ids {incoming:?} differ from in-flight chain ids {current:?}")]
    ChainIdsMismatch {
        current: Vec<ChainId>,
        incoming: Vec<ChainId>,
    },

    /// A cross-chain call was made outside an atomic transaction.
    #[error("No atomic transaction in flight")]
    NoAtomicTxInFlight,

    /// Cross-chain calls need a non-zero timeout.
    #[error("Cross-chain call timeout must be greater than zero")]
    ZeroTimeout,

    #[error(transparent)]
    Unauthorized(#[from] UnauthorizedChainError),

    #[error(transparent)]
    Determinism(#[from] DeterminismError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// A raw sub-transaction could not be decoded.
    #[error("Sub-transaction {index} is malformed: {source}")]
    Envelope {
        index: usize,
        #[source]
        source: EnvelopeError,
    },

    /// The deterministic pipeline could not produce a result.
    #[error("Sub-transaction {index} could not be executed: {source}")]
    SubTxExecution {
        index: usize,
        #[source]
        source: InvocationError,
    },

    /// A sub-transaction ran and failed; the whole batch aborts.
    #[error("Sub-transaction {index} failed with code {code}: {log}")]
    SubTxFailed { index: usize, code: u32, log: String },

    /// Another participant aborted the transaction before publishing the
    /// result this chain waits for.
    #[error("Chain {chain_id} aborted the atomic transaction: {reason}")]
    PeerAborted { chain_id: ChainId, reason: String },

    /// A channel was torn down while in use.
    #[error("Channels of chain {chain_id} are closed")]
    ChannelClosed { chain_id: ChainId },

    /// The registry has been closed.
    #[error("Cross-chain channel registry is closed")]
    RegistryClosed,
}

impl From<CoordinatorError> for InvocationError {
    fn from(e: CoordinatorError) -> Self {
        InvocationError::CrossChain(e.to_string())
    }
}
