//! Execution contexts for out-of-band invocations.

use crate::{CrossChainCaller, StoreOverlay, StorePartition};
use polychain_types::{BlockHeader, ChainId, Event};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A context shared between the task that owns it and the tasks serving
/// cross-chain calls into it.
pub type SharedContext = Arc<tokio::sync::Mutex<ExecutionContext>>;

/// Ephemeral overlay over committed chain state, bound to one header.
///
/// Built per invocation by the `ExecutionContextBuilder`. The invocation
/// mutates it freely; the builder either commits its out-of-band partitions
/// or the context is dropped and every change vanishes.
pub struct ExecutionContext {
    chain_id: ChainId,
    header: BlockHeader,
    overlay: StoreOverlay,
    events: Vec<Event>,
    cancel: CancellationToken,
    cross_chain: Option<Arc<dyn CrossChainCaller>>,
}

impl ExecutionContext {
    pub(crate) fn new(header: BlockHeader, overlay: StoreOverlay, cancel: CancellationToken) -> Self {
        Self {
            chain_id: header.chain_id.clone(),
            header,
            overlay,
            events: Vec::new(),
            cancel,
            cross_chain: None,
        }
    }

    /// Chain the context belongs to.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Header the context is bound to.
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Block time visible to contracts (milliseconds).
    pub fn block_time_ms(&self) -> u64 {
        self.header.timestamp_ms
    }

    /// Read a key.
    pub fn get(&self, partition: StorePartition, key: &[u8]) -> Option<Vec<u8>> {
        self.overlay.get(partition, key)
    }

    /// Write a key.
    pub fn set(&mut self, partition: StorePartition, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.overlay.set(partition, key.into(), value.into());
    }

    /// Delete a key.
    pub fn delete(&mut self, partition: StorePartition, key: impl Into<Vec<u8>>) {
        self.overlay.delete(partition, key.into());
    }

    /// Emit an event.
    pub fn emit_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Emit several events, in order.
    pub fn emit_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    /// Events emitted so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Cancellation signal of the scope this context runs in.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cross-chain caller, if an atomic transaction is in flight.
    pub fn cross_chain(&self) -> Option<Arc<dyn CrossChainCaller>> {
        self.cross_chain.clone()
    }

    /// Install the cross-chain caller.
    pub fn set_cross_chain(&mut self, caller: Arc<dyn CrossChainCaller>) {
        self.cross_chain = Some(caller);
    }

    /// Remove the cross-chain caller.
    pub fn clear_cross_chain(&mut self) {
        self.cross_chain = None;
    }

    /// A child context that sees every write made so far. The child's own
    /// writes and events never reach this context.
    pub fn branch(&self) -> ExecutionContext {
        Self {
            chain_id: self.chain_id.clone(),
            header: self.header.clone(),
            overlay: self.overlay.clone(),
            events: Vec::new(),
            cancel: self.cancel.child_token(),
            cross_chain: self.cross_chain.clone(),
        }
    }

    /// Wrap for sharing across tasks.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub(crate) fn into_parts(self) -> (ChainId, StoreOverlay) {
        (self.chain_id, self.overlay)
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.overlay.pending_writes()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("chain_id", &self.chain_id)
            .field("height", &self.header.height)
            .field("pending_writes", &self.overlay.pending_writes())
            .field("events", &self.events.len())
            .field("cross_chain", &self.cross_chain.is_some())
            .finish()
    }
}
