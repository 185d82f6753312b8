//! Collaborator interfaces consumed by out-of-band execution.
//!
//! The executor and the coordinator never talk to the contract engine, the
//! block pipeline, the query layer or the chain registry directly; they go
//! through these small traits so tests can substitute canned doubles.

use crate::{ChainInstance, ExecutionContext, HeaderError, RegistryError};
use async_trait::async_trait;
use polychain_core::{Invocation, InvocationError};
use polychain_types::{
    BlockHeader, ChainId, CrossChainCallRequest, CrossChainCallResponse, Event, ExecTxResult,
};

/// The contract execution engine.
#[async_trait]
pub trait ContractEngine: Send + Sync {
    /// Dispatch one entry point against `ctx`, returning the response bytes.
    ///
    /// State changes go to the context's overlay; they persist only if the
    /// caller later commits the context.
    async fn invoke_entry_point(
        &self,
        ctx: &mut ExecutionContext,
        invocation: Invocation,
    ) -> Result<Vec<u8>, InvocationError>;
}

/// Events and result of one deterministic sub-transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubTxOutcome {
    pub events: Vec<Event>,
    pub result: ExecTxResult,
}

/// The chain's normal transaction pipeline.
#[async_trait]
pub trait DeterministicPipeline: Send + Sync {
    /// Execute a raw sub-transaction against `ctx`.
    ///
    /// A transaction that runs and fails reports a non-zero result code;
    /// `Err` is reserved for failures that prevent producing a result.
    async fn execute_sub_tx(
        &self,
        ctx: &mut ExecutionContext,
        raw: &[u8],
    ) -> Result<SubTxOutcome, InvocationError>;
}

/// Issues cross-chain calls on behalf of code running inside a context.
///
/// Installed on an [`ExecutionContext`] while an atomic transaction is in
/// flight; contracts reach it through [`ExecutionContext::cross_chain`].
#[async_trait]
pub trait CrossChainCaller: Send + Sync {
    /// Perform one synchronous cross-chain call from `ctx`'s chain.
    async fn call(
        &self,
        ctx: &mut ExecutionContext,
        request: CrossChainCallRequest,
    ) -> Result<CrossChainCallResponse, InvocationError>;
}

/// The network/query layer's view of committed headers.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Header of `chain` at `height`. Height 0 means "latest".
    async fn header_by_height(
        &self,
        chain: &ChainInstance,
        height: i64,
    ) -> Result<BlockHeader, HeaderError>;
}

/// Process-wide lookup of chain instances.
pub trait ChainRegistry: Send + Sync {
    /// Chain instance hosted under `id`.
    fn chain(&self, id: &ChainId) -> Result<ChainInstance, RegistryError>;

    /// Ids of every hosted chain, in configuration order.
    fn chain_ids(&self) -> Vec<ChainId>;

    /// Whether `id` is hosted by this node.
    fn is_resident(&self, id: &ChainId) -> bool {
        self.chain(id).is_ok()
    }
}
