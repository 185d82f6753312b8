//! Process-wide registry of cross-chain channels and atomic-tx progress.
//!
//! # Design
//!
//! Every chain taking part in an atomic transaction owns three channels:
//!
//! - **results**: a `watch` channel holding the results the chain has
//!   produced so far for the current transaction. Publishing never blocks,
//!   and waiters filter stale values by transaction hash.
//! - **requests**: single-slot queue of cross-chain calls into the chain,
//!   drained by the chain's call server while it takes part in a
//!   transaction.
//! - **responses**: single-slot queue of the call server's answers. A caller
//!   holds the receiver for the whole wait, so at most one call per target
//!   chain is outstanding, and every response carries its [`CallKey`] so a
//!   late answer to a timed-out call is recognized and dropped.
//!
//! An execution that waits on an outbound call keeps its chain's context
//! locked, so the call server cannot take calls back into that chain. The
//! waiting execution registers as a waiter instead, and the server hands
//! such calls to the innermost waiter, which runs them on the context it
//! holds.
//!
//! Channels are created on first use through an atomic get-or-create on a
//! concurrent map.
//!
//! The registry tracks at most one atomic transaction. Each local
//! coordinator joins it through a [`Participation`] guard; the last guard
//! dropped returns the registry to Idle.

use crate::{CoordinatorError, UnauthorizedChainError};
use dashmap::DashMap;
use parking_lot::Mutex;
use polychain_types::{
    CallKey, ChainId, CrossChainCallRequestIndexed, CrossChainCallResponseIndexed, ExecTxResult,
    Hash,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info};

/// Results a chain has published for one atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedResults {
    pub atomic_tx: Hash,

    /// Indexed by sub-transaction; `None` until the chain produced it.
    pub results: Vec<Option<ExecTxResult>>,

    /// Set when the publishing chain gave up on the transaction.
    pub aborted: Option<String>,
}

/// Synchronization channels of one chain.
#[derive(Debug)]
pub struct ChainChannels {
    chain_id: ChainId,
    results: watch::Sender<Option<PublishedResults>>,
    requests_tx: mpsc::Sender<CrossChainCallRequestIndexed>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<CrossChainCallRequestIndexed>>,
    responses_tx: mpsc::Sender<CrossChainCallResponseIndexed>,
    responses_rx: tokio::sync::Mutex<mpsc::Receiver<CrossChainCallResponseIndexed>>,
    /// Executions of this chain blocked on an outbound call, innermost last.
    waiters: Mutex<Vec<mpsc::Sender<CrossChainCallRequestIndexed>>>,
    waiter_registered: Notify,
}

impl ChainChannels {
    fn new(chain_id: ChainId) -> Self {
        let (results, _) = watch::channel(None);
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (responses_tx, responses_rx) = mpsc::channel(1);
        Self {
            chain_id,
            results,
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
            responses_tx,
            responses_rx: tokio::sync::Mutex::new(responses_rx),
            waiters: Mutex::new(Vec::new()),
            waiter_registered: Notify::new(),
        }
    }

    /// Chain these channels belong to.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Publish the results produced so far for `atomic_tx`.
    pub fn publish(&self, atomic_tx: Hash, results: &[Option<ExecTxResult>]) {
        self.results.send_replace(Some(PublishedResults {
            atomic_tx,
            results: results.to_vec(),
            aborted: None,
        }));
    }

    /// Mark `atomic_tx` as aborted by this chain, keeping published results.
    pub fn abort(&self, atomic_tx: Hash, reason: String) {
        self.results.send_modify(|current| match current {
            Some(published) if published.atomic_tx == atomic_tx => {
                published.aborted = Some(reason);
            }
            _ => {
                *current = Some(PublishedResults {
                    atomic_tx,
                    results: Vec::new(),
                    aborted: Some(reason),
                });
            }
        });
    }

    /// Subscribe to published results.
    pub fn subscribe_results(&self) -> watch::Receiver<Option<PublishedResults>> {
        self.results.subscribe()
    }

    pub(crate) fn requests_tx(&self) -> mpsc::Sender<CrossChainCallRequestIndexed> {
        self.requests_tx.clone()
    }

    pub(crate) fn requests_rx(&self) -> &tokio::sync::Mutex<mpsc::Receiver<CrossChainCallRequestIndexed>> {
        &self.requests_rx
    }

    pub(crate) fn responses_tx(&self) -> mpsc::Sender<CrossChainCallResponseIndexed> {
        self.responses_tx.clone()
    }

    pub(crate) fn responses_rx(&self) -> &tokio::sync::Mutex<mpsc::Receiver<CrossChainCallResponseIndexed>> {
        &self.responses_rx
    }

    /// Register an execution of this chain that holds its context while
    /// waiting on an outbound call. Calls into the chain are delivered to
    /// the returned [`Waiter`] until it is dropped.
    pub(crate) fn register_waiter(&self) -> Waiter<'_> {
        let (tx, rx) = mpsc::channel(1);
        self.waiters.lock().push(tx.clone());
        self.waiter_registered.notify_waiters();
        Waiter {
            channels: self,
            tx,
            rx,
        }
    }

    /// Sender of the innermost registered waiter.
    pub(crate) fn innermost_waiter(&self) -> Option<mpsc::Sender<CrossChainCallRequestIndexed>> {
        self.waiters.lock().last().cloned()
    }

    /// Completes on the next [`register_waiter`](Self::register_waiter).
    pub(crate) fn waiter_registered(&self) -> Notified<'_> {
        self.waiter_registered.notified()
    }
}

/// Registration of an execution waiting on an outbound call.
///
/// Unregisters on drop, before its receiver closes.
pub(crate) struct Waiter<'a> {
    channels: &'a ChainChannels,
    tx: mpsc::Sender<CrossChainCallRequestIndexed>,
    rx: mpsc::Receiver<CrossChainCallRequestIndexed>,
}

impl Waiter<'_> {
    /// Next call into this chain handed over by the call server.
    pub(crate) async fn recv(&mut self) -> Option<CrossChainCallRequestIndexed> {
        self.rx.recv().await
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.channels
            .waiters
            .lock()
            .retain(|waiter| !waiter.same_channel(&self.tx));
    }
}

#[derive(Debug)]
struct InFlight {
    hash: Hash,
    chain_ids: Vec<ChainId>,
    participants: usize,
}

#[derive(Debug, Default)]
struct AtomicTxState {
    current: Option<InFlight>,
    sub_tx_index: HashMap<ChainId, usize>,
    cross_call_index: HashMap<ChainId, usize>,
}

/// Registry of per-chain channels and the in-flight atomic transaction.
///
/// Created at node start, shared by every coordinator, closed at node stop
/// once no transaction is in flight.
#[derive(Debug, Default)]
pub struct CrossChainChannelRegistry {
    channels: DashMap<ChainId, Arc<ChainChannels>>,
    state: Mutex<AtomicTxState>,
    idle: Notify,
    closed: AtomicBool,
}

impl CrossChainChannelRegistry {
    /// Create an empty, Idle registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channels of `chain_id`, created if absent.
    pub fn channels(&self, chain_id: &ChainId) -> Result<Arc<ChainChannels>, CoordinatorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinatorError::RegistryClosed);
        }
        let channels = self
            .channels
            .entry(chain_id.clone())
            .or_insert_with(|| {
                debug!(chain_id = %chain_id, "Creating cross-chain channels");
                Arc::new(ChainChannels::new(chain_id.clone()))
            })
            .clone();
        Ok(channels)
    }

    /// Whether channels exist for `chain_id`.
    pub fn has_channels(&self, chain_id: &ChainId) -> bool {
        self.channels.contains_key(chain_id)
    }

    /// Number of chains with channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Join atomic transaction `hash`.
    ///
    /// The first participant sets the transaction and its authorized chain
    /// ids: `requested` if given, otherwise `fallback`. Later participants
    /// must present the same hash and, if they carry their own chain ids,
    /// the same set.
    pub fn join(
        self: &Arc<Self>,
        hash: Hash,
        requested: Option<Vec<ChainId>>,
        fallback: Vec<ChainId>,
    ) -> Result<Participation, CoordinatorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinatorError::RegistryClosed);
        }
        let mut state = self.state.lock();
        let chain_ids = match state.current.as_mut() {
            None => {
                let chain_ids = requested.unwrap_or(fallback);
                state.current = Some(InFlight {
                    hash,
                    chain_ids: chain_ids.clone(),
                    participants: 1,
                });
                state.sub_tx_index.clear();
                state.cross_call_index.clear();
                info!(atomic_tx = %hash, chain_ids = ?chain_ids, "Atomic transaction started");
                chain_ids
            }
            Some(current) if current.hash != hash => {
                return Err(CoordinatorError::HashMismatch {
                    current: current.hash,
                    incoming: hash,
                });
            }
            Some(current) => {
                if let Some(requested) = requested {
                    if requested != current.chain_ids {
                        return Err(CoordinatorError::ChainIdsMismatch {
                            current: current.chain_ids.clone(),
                            incoming: requested,
                        });
                    }
                }
                current.participants += 1;
                current.chain_ids.clone()
            }
        };
        Ok(Participation {
            registry: self.clone(),
            hash,
            chain_ids,
        })
    }

    fn leave(&self, hash: Hash) {
        let mut state = self.state.lock();
        let finished = match state.current.as_mut() {
            Some(current) if current.hash == hash => {
                current.participants -= 1;
                current.participants == 0
            }
            _ => false,
        };
        if finished {
            state.current = None;
            state.sub_tx_index.clear();
            state.cross_call_index.clear();
            drop(state);
            info!(atomic_tx = %hash, "Atomic transaction finished, registry idle");
            self.idle.notify_waiters();
        }
    }

    /// Hash of the in-flight transaction.
    pub fn current_atomic_tx(&self) -> Option<Hash> {
        self.state.lock().current.as_ref().map(|c| c.hash)
    }

    /// Authorized chain ids of the in-flight transaction; empty when Idle.
    pub fn current_chain_ids(&self) -> Vec<ChainId> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|c| c.chain_ids.clone())
            .unwrap_or_default()
    }

    /// Whether no transaction is in flight.
    pub fn is_idle(&self) -> bool {
        self.state.lock().current.is_none()
    }

    /// Check every chain id against the in-flight authorized set.
    pub fn authorize<'a>(
        &self,
        chain_ids: impl IntoIterator<Item = &'a ChainId>,
    ) -> Result<(), CoordinatorError> {
        let state = self.state.lock();
        let current = state
            .current
            .as_ref()
            .ok_or(CoordinatorError::NoAtomicTxInFlight)?;
        for chain_id in chain_ids {
            if !current.chain_ids.contains(chain_id) {
                return Err(UnauthorizedChainError {
                    chain_id: chain_id.clone(),
                    authorized: current.chain_ids.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Record that `chain_id` starts sub-transaction `index`.
    pub fn begin_sub_tx(&self, chain_id: &ChainId, index: usize) {
        let mut state = self.state.lock();
        state.sub_tx_index.insert(chain_id.clone(), index);
        state.cross_call_index.insert(chain_id.clone(), 0);
    }

    /// Sub-transaction `chain_id` is executing.
    pub fn sub_tx_index(&self, chain_id: &ChainId) -> usize {
        self.state
            .lock()
            .sub_tx_index
            .get(chain_id)
            .copied()
            .unwrap_or(0)
    }

    /// Capture and advance `chain_id`'s cross-call index.
    pub fn next_cross_call(&self, chain_id: &ChainId) -> Result<CallKey, CoordinatorError> {
        let mut state = self.state.lock();
        let atomic_tx = state
            .current
            .as_ref()
            .map(|c| c.hash)
            .ok_or(CoordinatorError::NoAtomicTxInFlight)?;
        let sub_tx_index = state.sub_tx_index.get(chain_id).copied().unwrap_or(0);
        let counter = state.cross_call_index.entry(chain_id.clone()).or_insert(0);
        let index = *counter;
        *counter += 1;
        Ok(CallKey {
            atomic_tx,
            from_chain_id: chain_id.clone(),
            sub_tx_index,
            index,
        })
    }

    /// Position `chain_id`'s cross-call index at `index`, so the next call
    /// replays the recorded call at that position.
    pub fn seek_cross_call(&self, chain_id: &ChainId, index: usize) {
        self.state
            .lock()
            .cross_call_index
            .insert(chain_id.clone(), index);
    }

    /// Wait until no transaction is in flight, then drop every channel.
    /// Later joins fail with [`CoordinatorError::RegistryClosed`].
    pub async fn close(&self, poll_interval: Duration) {
        let mut logged = false;
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                break;
            }
            if !logged {
                info!("Waiting for in-flight atomic transaction before closing registry");
                logged = true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
        info!("Cross-chain channel registry closed");
    }
}

/// Membership of one local coordinator in the in-flight transaction.
///
/// Dropping the guard leaves the transaction.
#[derive(Debug)]
pub struct Participation {
    registry: Arc<CrossChainChannelRegistry>,
    hash: Hash,
    chain_ids: Vec<ChainId>,
}

impl Participation {
    /// Hash of the joined transaction.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Authorized chain ids of the joined transaction.
    pub fn chain_ids(&self) -> &[ChainId] {
        &self.chain_ids
    }
}

impl Drop for Participation {
    fn drop(&mut self) {
        self.registry.leave(self.hash);
    }
}
