//! Atomic transaction coordination for one chain instance.

use crate::server::{dispatch, CallServer};
use crate::{ChainChannels, CoordinatorConfig, CoordinatorError, CrossChainChannelRegistry, TimeoutError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use polychain_core::{InvocationError, ReplayInfoSource};
use polychain_engine::{
    ChainRegistry, ContractEngine, CrossChainCaller, DeterministicPipeline, ExecutionContext,
    SharedContext,
};
use polychain_types::{
    AtomicTxRequest, AtomicTxResponse, CallKey, ChainId, CrossChainCallRequest,
    CrossChainCallRequestIndexed, CrossChainCallResponse, CrossChainCallResponseIndexed,
    ExecTxResult, Hash, SubTxEnvelope,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Executes atomic transactions and cross-chain calls on behalf of one
/// chain instance.
///
/// Every chain hosted by the node has its own coordinator; all of them share
/// one [`CrossChainChannelRegistry`]. While an atomic transaction runs, the
/// coordinator is installed as the context's [`CrossChainCaller`], so
/// contracts reach other chains through it.
pub struct AtomicTxCoordinator {
    pub(crate) chain_id: ChainId,
    pub(crate) registry: Arc<CrossChainChannelRegistry>,
    chains: Arc<dyn ChainRegistry>,
    engine: Arc<dyn ContractEngine>,
    pipeline: Arc<dyn DeterministicPipeline>,
    pub(crate) replay: Arc<dyn ReplayInfoSource>,
    config: CoordinatorConfig,
}

impl AtomicTxCoordinator {
    /// Create the coordinator of `chain_id`.
    pub fn new(
        chain_id: ChainId,
        registry: Arc<CrossChainChannelRegistry>,
        chains: Arc<dyn ChainRegistry>,
        engine: Arc<dyn ContractEngine>,
        pipeline: Arc<dyn DeterministicPipeline>,
        replay: Arc<dyn ReplayInfoSource>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            registry,
            chains,
            engine,
            pipeline,
            replay,
            config,
        })
    }

    /// Chain this coordinator acts for.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Registry shared with the node's other coordinators.
    pub fn registry(&self) -> &Arc<CrossChainChannelRegistry> {
        &self.registry
    }

    /// Execute every sub-transaction of `request` in order.
    ///
    /// Sub-transactions targeting this chain run through the deterministic
    /// pipeline on `ctx`; those of other resident chains are awaited from
    /// their own coordinators; those of non-resident chains are taken from
    /// the replay log. The first failure aborts the whole batch. On every
    /// exit this coordinator leaves the registry, which returns to Idle once
    /// every local participant has left.
    #[instrument(skip_all, fields(chain_id = %self.chain_id, atomic_tx = tracing::field::Empty))]
    pub async fn execute_atomic_tx(
        self: &Arc<Self>,
        ctx: &SharedContext,
        request: &AtomicTxRequest,
    ) -> Result<AtomicTxResponse, CoordinatorError> {
        let hash = request.hash();
        tracing::Span::current().record("atomic_tx", tracing::field::display(hash));

        let envelopes = request
            .txs
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                SubTxEnvelope::decode(raw).map_err(|source| CoordinatorError::Envelope { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let requested = (!request.chain_ids.is_empty())
            .then(|| normalize(request.chain_ids.iter().cloned()));
        let targets = normalize(envelopes.iter().map(|e| e.chain_id.clone()));

        let participation = self.registry.join(hash, requested, targets)?;
        self.registry.authorize([&self.chain_id])?;
        let own = self.registry.channels(&self.chain_id)?;

        let server = CallServer::spawn(
            self.chain_id.clone(),
            hash,
            own.clone(),
            ctx.clone(),
            self.engine.clone(),
        );
        let cancel = {
            let mut guard = ctx.lock().await;
            guard.set_cross_chain(self.clone());
            guard.cancellation().clone()
        };

        let outcome = self.run(ctx, hash, request, &envelopes, &own, &cancel).await;

        ctx.lock().await.clear_cross_chain();
        server.shutdown().await;

        match outcome {
            Ok(results) => {
                info!(
                    sub_txs = results.len(),
                    chain_ids = ?participation.chain_ids(),
                    "Atomic transaction executed"
                );
                Ok(AtomicTxResponse { results })
            }
            Err(e) => {
                warn!(error = %e, "Atomic transaction aborted");
                own.abort(hash, e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        self: &Arc<Self>,
        ctx: &SharedContext,
        hash: Hash,
        request: &AtomicTxRequest,
        envelopes: &[SubTxEnvelope],
        own: &ChainChannels,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecTxResult>, CoordinatorError> {
        let mut results: Vec<Option<ExecTxResult>> = vec![None; envelopes.len()];

        for (index, envelope) in envelopes.iter().enumerate() {
            let target = &envelope.chain_id;
            self.registry.begin_sub_tx(&self.chain_id, index);
            self.registry.authorize([target])?;
            debug!(subtx = index, target = %target, "Processing sub-transaction");

            let result = if *target == self.chain_id {
                let outcome = {
                    let mut guard = ctx.lock().await;
                    let outcome = self
                        .pipeline
                        .execute_sub_tx(&mut guard, &request.txs[index])
                        .await
                        .map_err(|source| CoordinatorError::SubTxExecution { index, source })?;
                    guard.emit_events(outcome.events.iter().cloned());
                    outcome
                };
                results[index] = Some(outcome.result.clone());
                own.publish(hash, &results);
                outcome.result
            } else if self.chains.is_resident(target) {
                self.await_result(hash, target, index, cancel).await?
            } else {
                self.replay_sub_tx(ctx, index).await?
            };

            if !result.is_ok() {
                return Err(CoordinatorError::SubTxFailed {
                    index,
                    code: result.code,
                    log: result.log,
                });
            }
            results[index] = Some(result);
        }

        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }

    /// Wait for resident chain `chain_id` to publish the result of
    /// sub-transaction `index`.
    async fn await_result(
        &self,
        hash: Hash,
        chain_id: &ChainId,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ExecTxResult, CoordinatorError> {
        let channels = self.registry.channels(chain_id)?;
        let mut results = channels.subscribe_results();
        let mut logged = false;

        loop {
            {
                let current = results.borrow_and_update();
                if let Some(published) = current.as_ref().filter(|p| p.atomic_tx == hash) {
                    if let Some(Some(result)) = published.results.get(index) {
                        debug!(subtx = index, from = %chain_id, "Received sub-transaction result");
                        return Ok(result.clone());
                    }
                    if let Some(reason) = &published.aborted {
                        return Err(CoordinatorError::PeerAborted {
                            chain_id: chain_id.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
            }

            tokio::select! {
                changed = results.changed() => {
                    if changed.is_err() {
                        return Err(CoordinatorError::ChannelClosed {
                            chain_id: chain_id.clone(),
                        });
                    }
                }
                _ = cancel.cancelled(), if !logged => {
                    info!(subtx = index, from = %chain_id, "Shutdown requested, still waiting for sub-transaction result");
                    logged = true;
                }
            }
        }
    }

    /// Perform one cross-chain call from the context's chain.
    ///
    /// Calls into this chain are dispatched inline on `ctx`. Calls into
    /// other resident chains go through their call servers and are bounded
    /// by the request timeout. Calls into non-resident chains are answered
    /// from the replay log after the request is checked against it.
    pub fn execute_cross_chain_tx<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        request: CrossChainCallRequest,
    ) -> BoxFuture<'a, Result<CrossChainCallResponse, CoordinatorError>> {
        async move {
            if request.timeout_ms == 0 {
                return Err(CoordinatorError::ZeroTimeout);
            }
            let key = self.registry.next_cross_call(&self.chain_id)?;
            self.registry
                .authorize([&request.from_chain_id, &request.to_chain_id])?;

            debug!(
                chain_id = %self.chain_id,
                subtx = key.sub_tx_index,
                crosschaincall_index = key.index,
                to_chain_id = %request.to_chain_id,
                "Cross-chain call"
            );

            if request.to_chain_id == self.chain_id {
                Ok(dispatch(self.engine.as_ref(), ctx, &request).await)
            } else if !self.chains.is_resident(&request.to_chain_id) {
                self.replay_call(ctx, &key, &request).await
            } else {
                self.call_resident(ctx, key, request).await
            }
        }
        .boxed()
    }

    /// Call resident chain `request.to_chain_id` and wait for its answer.
    ///
    /// `ctx` stays borrowed for the whole wait, so calls the target makes
    /// back into this chain are handed over by this chain's call server and
    /// run inline on `ctx`.
    async fn call_resident(
        &self,
        ctx: &mut ExecutionContext,
        key: CallKey,
        request: CrossChainCallRequest,
    ) -> Result<CrossChainCallResponse, CoordinatorError> {
        let target = request.to_chain_id.clone();
        let timeout = self.config.effective_timeout(request.timeout_ms);
        let timed_out = || TimeoutError {
            chain_id: target.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let cancel = ctx.cancellation().clone();
        let channels = self.registry.channels(&target)?;
        let own = self.registry.channels(&self.chain_id)?;

        // One outstanding call per target chain.
        let mut responses = tokio::select! {
            guard = channels.responses_rx().lock() => guard,
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out().into()),
        };

        let mut waiter = own.register_waiter();
        let requests = channels.requests_tx();
        let indexed = CrossChainCallRequestIndexed {
            key: key.clone(),
            request,
        };
        tokio::spawn(async move {
            match tokio::time::timeout_at(deadline, requests.send(indexed)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("Cross-chain request channel closed"),
                Err(_) => debug!("Cross-chain request not picked up before deadline"),
            }
        });

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let mut logged = false;
        loop {
            tokio::select! {
                received = responses.recv() => match received {
                    Some(reply) if reply.key == key => return Ok(reply.response),
                    Some(reply) => {
                        warn!(expected = %key, received = %reply.key, "Dropping stale cross-chain response");
                    }
                    None => {
                        return Err(CoordinatorError::ChannelClosed {
                            chain_id: target.clone(),
                        })
                    }
                },
                _ = &mut sleep => {
                    warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Cross-chain call timed out");
                    return Err(timed_out().into());
                }
                Some(inbound) = waiter.recv() => {
                    debug!(
                        key = %inbound.key,
                        from_chain_id = %inbound.request.from_chain_id,
                        "Serving nested cross-chain call inline"
                    );
                    let response = dispatch(self.engine.as_ref(), ctx, &inbound.request).await;
                    let reply = CrossChainCallResponseIndexed {
                        key: inbound.key,
                        response,
                    };
                    if own.responses_tx().send(reply).await.is_err() {
                        debug!(chain_id = %self.chain_id, "Cross-chain response channel closed");
                    }
                }
                _ = cancel.cancelled(), if !logged => {
                    info!(key = %key, "Shutdown requested, still waiting for cross-chain response");
                    logged = true;
                }
            }
        }
    }
}

#[async_trait]
impl CrossChainCaller for AtomicTxCoordinator {
    async fn call(
        &self,
        ctx: &mut ExecutionContext,
        request: CrossChainCallRequest,
    ) -> Result<CrossChainCallResponse, InvocationError> {
        Ok(self.execute_cross_chain_tx(ctx, request).await?)
    }
}

impl std::fmt::Debug for AtomicTxCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicTxCoordinator")
            .field("chain_id", &self.chain_id)
            .field("config", &self.config)
            .finish()
    }
}

/// Sorted, deduplicated chain ids.
fn normalize(ids: impl IntoIterator<Item = ChainId>) -> Vec<ChainId> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let ids = normalize(["b", "a", "b", "c"].map(ChainId::from));
        assert_eq!(ids, ["a", "b", "c"].map(ChainId::from).to_vec());
    }
}
