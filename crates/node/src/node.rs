//! Node assembly.
//!
//! A [`Node`] hosts one or more chain instances in a single process. Every
//! hosted chain gets its own executor, task launcher and atomic transaction
//! coordinator; the coordinators share one cross-chain channel registry and
//! every background job observes one shutdown token.

use crate::{NodeConfig, NodeError};
use futures::future::join_all;
use indexmap::IndexMap;
use polychain_core::ReplayInfoSource;
use polychain_crosschain::{AtomicTxCoordinator, CrossChainChannelRegistry, InMemoryReplayStore};
use polychain_engine::{
    ChainInstance, ChainRegistry, CommitHistoryHeaders, ContractEngine, DeterministicPipeline,
    ExecutionContextBuilder, HeaderSource, LocalChainRegistry, SharedContext,
};
use polychain_execution::{ActionExecutor, ExecutionHooks};
use polychain_production::{init_telemetry, AsyncTaskLauncher};
use polychain_types::{AtomicTxRequest, AtomicTxResponse, ChainId, SubTxEnvelope};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External collaborators the node is wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ContractEngine>,
    pub pipeline: Arc<dyn DeterministicPipeline>,
    pub headers: Arc<dyn HeaderSource>,
    pub replay: Arc<dyn ReplayInfoSource>,
    pub hooks: Option<Arc<dyn ExecutionHooks>>,
}

impl Collaborators {
    /// Collaborators resolving headers from commit history and reading
    /// replay logs from an empty in-memory store.
    pub fn new(engine: Arc<dyn ContractEngine>, pipeline: Arc<dyn DeterministicPipeline>) -> Self {
        Self {
            engine,
            pipeline,
            headers: Arc::new(CommitHistoryHeaders),
            replay: Arc::new(InMemoryReplayStore::new()),
            hooks: None,
        }
    }

    pub fn with_headers(mut self, headers: Arc<dyn HeaderSource>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_replay(mut self, replay: Arc<dyn ReplayInfoSource>) -> Self {
        self.replay = replay;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

/// Services wired for one hosted chain.
pub struct ChainServices {
    executor: Arc<ActionExecutor>,
    launcher: AsyncTaskLauncher,
    coordinator: Arc<AtomicTxCoordinator>,
}

impl ChainServices {
    pub fn chain(&self) -> &ChainInstance {
        self.executor.chain()
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn launcher(&self) -> &AsyncTaskLauncher {
        &self.launcher
    }

    pub fn coordinator(&self) -> &Arc<AtomicTxCoordinator> {
        &self.coordinator
    }
}

/// One hosted chain's part of an atomic transaction.
pub struct ParticipantOutcome {
    pub chain_id: ChainId,
    pub response: AtomicTxResponse,
    /// Context the sub-transactions ran in. The block pipeline commits it.
    pub context: SharedContext,
}

/// A process hosting several chain instances.
pub struct Node {
    config: NodeConfig,
    chains: Arc<LocalChainRegistry>,
    registry: Arc<CrossChainChannelRegistry>,
    services: IndexMap<ChainId, ChainServices>,
    shutdown: CancellationToken,
}

impl Node {
    /// Install the global tracing subscriber from `config.telemetry`, then
    /// assemble the node.
    ///
    /// Process entry points use this; [`Node::new`] leaves logging to the
    /// caller.
    pub fn start(config: NodeConfig, collaborators: Collaborators) -> Result<Self, NodeError> {
        config.validate()?;
        init_telemetry(&config.telemetry)?;
        Self::new(config, collaborators)
    }

    /// Validate `config` and wire services for every configured chain.
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Result<Self, NodeError> {
        config.validate()?;

        let chains: LocalChainRegistry = config
            .chains
            .iter()
            .map(|c| ChainInstance::new(c.id.clone()))
            .collect();
        let chains = Arc::new(chains);
        let registry = CrossChainChannelRegistry::new();
        let shutdown = CancellationToken::new();

        let mut services = IndexMap::new();
        for chain_id in chains.chain_ids() {
            let chain = chains
                .chain(&chain_id)
                .map_err(|_| NodeError::UnknownChain(chain_id.clone()))?;

            let mut executor = ActionExecutor::new(chain, collaborators.headers.clone());
            if let Some(hooks) = &collaborators.hooks {
                executor = executor.with_hooks(hooks.clone());
            }
            let executor = Arc::new(executor);
            let launcher = AsyncTaskLauncher::new(
                executor.clone(),
                collaborators.engine.clone(),
                shutdown.clone(),
                config.launcher.clone(),
            );
            let coordinator = AtomicTxCoordinator::new(
                chain_id.clone(),
                registry.clone(),
                chains.clone(),
                collaborators.engine.clone(),
                collaborators.pipeline.clone(),
                collaborators.replay.clone(),
                config.crosschain.clone(),
            );
            debug!(chain_id = %chain_id, "Chain services wired");
            services.insert(
                chain_id,
                ChainServices {
                    executor,
                    launcher,
                    coordinator,
                },
            );
        }

        info!(chains = services.len(), "Node assembled");
        Ok(Self {
            config,
            chains,
            registry,
            services,
            shutdown,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Ids of the hosted chains, in configuration order.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.services.keys().cloned().collect()
    }

    /// Process-wide chain registry.
    pub fn chains(&self) -> &Arc<LocalChainRegistry> {
        &self.chains
    }

    /// Services of the hosted chain `chain_id`.
    pub fn services(&self, chain_id: &ChainId) -> Result<&ChainServices, NodeError> {
        self.services
            .get(chain_id)
            .ok_or_else(|| NodeError::UnknownChain(chain_id.clone()))
    }

    pub fn registry(&self) -> &Arc<CrossChainChannelRegistry> {
        &self.registry
    }

    /// Node-wide shutdown signal.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run `request` on every hosted participant concurrently.
    ///
    /// Participants are the hosted chains among `request.chain_ids`, or
    /// among the sub-transaction targets when that list is empty. Each runs
    /// in a fresh context at its tip. Fails with the first participant's
    /// error, in configuration order.
    pub async fn execute_atomic_tx(
        &self,
        request: &AtomicTxRequest,
    ) -> Result<Vec<ParticipantOutcome>, NodeError> {
        let wanted: BTreeSet<ChainId> = if request.chain_ids.is_empty() {
            request
                .txs
                .iter()
                .filter_map(|raw| SubTxEnvelope::decode(raw).ok())
                .map(|envelope| envelope.chain_id)
                .collect()
        } else {
            request.chain_ids.iter().cloned().collect()
        };
        let participants: Vec<&ChainServices> = self
            .services
            .iter()
            .filter(|(id, _)| wanted.contains(*id))
            .map(|(_, services)| services)
            .collect();
        if participants.is_empty() {
            return Err(NodeError::NoResidentParticipant);
        }

        let builder = ExecutionContextBuilder::new();
        let mut contexts = Vec::with_capacity(participants.len());
        for services in &participants {
            let chain = services.chain();
            let ctx = builder
                .build_from_header(
                    chain,
                    &builder.mock_header(chain),
                    false,
                    self.shutdown.child_token(),
                )
                .map_err(|e| NodeError::Context {
                    chain_id: chain.id().clone(),
                    source: e,
                })?;
            contexts.push(ctx.into_shared());
        }

        let runs = participants
            .iter()
            .zip(&contexts)
            .map(|(services, ctx)| services.coordinator.execute_atomic_tx(ctx, request));
        let results = join_all(runs).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for ((services, context), result) in participants.iter().zip(contexts).zip(results) {
            let chain_id = services.chain().id().clone();
            match result {
                Ok(response) => outcomes.push(ParticipantOutcome {
                    chain_id,
                    response,
                    context,
                }),
                Err(source) => return Err(NodeError::AtomicTx { chain_id, source }),
            }
        }
        Ok(outcomes)
    }

    /// Signal shutdown and wait for the in-flight atomic transaction, if
    /// any, to finish.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Node shutdown already requested");
        }
        info!("Node shutting down");
        self.shutdown.cancel();
        self.registry
            .close(self.config.crosschain.drain_poll_interval())
            .await;
        info!("Node shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainConfig;
    use polychain_crosschain::CoordinatorError;
    use polychain_production::{TaskOutcome, TimeoutRequest};
    use polychain_core::RequestId;
    use polychain_test_helpers::{call_request, scripted_sub_tx, CannedEngine, ScriptedPipeline, ScriptedTx};
    use polychain_types::ExecTxResult;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn config(ids: &[&str]) -> NodeConfig {
        NodeConfig {
            chains: ids
                .iter()
                .map(|id| ChainConfig {
                    id: ChainId::from(*id),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn node(ids: &[&str], engine: Arc<CannedEngine>) -> Node {
        let node = Node::new(
            config(ids),
            Collaborators::new(engine, Arc::new(ScriptedPipeline::new())),
        )
        .unwrap();
        for id in node.chain_ids() {
            node.services(&id).unwrap().chain().store().commit_block([], 1_000);
        }
        node
    }

    fn pong() -> Arc<CannedEngine> {
        Arc::new(CannedEngine::with_handler(|_, _| Ok(b"pong".to_vec())))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = Node::new(
            NodeConfig::default(),
            Collaborators::new(pong(), Arc::new(ScriptedPipeline::new())),
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_services_per_chain() {
        let node = node(&["a", "b"], pong());
        assert_eq!(node.chain_ids(), vec![ChainId::from("a"), ChainId::from("b")]);
        assert_eq!(node.chains().len(), 2);

        let b = node.services(&ChainId::from("b")).unwrap();
        assert_eq!(b.chain().id(), &ChainId::from("b"));
        assert_eq!(b.launcher().chain_id(), &ChainId::from("b"));
        assert_eq!(b.coordinator().chain_id(), &ChainId::from("b"));

        assert!(matches!(
            node.services(&ChainId::from("z")),
            Err(NodeError::UnknownChain(id)) if id == ChainId::from("z")
        ));
    }

    #[traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_atomic_tx_across_hosted_chains() {
        let node = node(&["a", "b"], pong());
        let request = AtomicTxRequest {
            chain_ids: vec![],
            txs: vec![
                scripted_sub_tx("a", &ScriptedTx::ok("a:").with_call(call_request("a", "b", b"ping"))),
                scripted_sub_tx("b", &ScriptedTx::ok("b-done")),
            ],
        };

        let outcomes = node.execute_atomic_tx(&request).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let expected = vec![
            ExecTxResult::ok(b"a:pong".to_vec()),
            ExecTxResult::ok(b"b-done".to_vec()),
        ];
        for outcome in &outcomes {
            assert_eq!(outcome.response.results, expected);
            assert!(outcome.context.lock().await.cross_chain().is_none());
        }
        assert_eq!(outcomes[0].chain_id, ChainId::from("a"));
        assert!(node.registry().is_idle());
        assert!(logs_contain("Atomic transaction executed"));
    }

    #[tokio::test]
    async fn test_atomic_tx_without_hosted_participant() {
        let node = node(&["a"], pong());
        let request = AtomicTxRequest {
            chain_ids: vec![ChainId::from("x")],
            txs: vec![scripted_sub_tx("x", &ScriptedTx::ok("x"))],
        };
        assert!(matches!(
            node.execute_atomic_tx(&request).await,
            Err(NodeError::NoResidentParticipant)
        ));
    }

    #[tokio::test]
    async fn test_atomic_tx_failure_names_chain() {
        let node = node(&["a"], pong());
        let mut failing = ScriptedTx::ok("boom");
        failing.code = 5;
        let request = AtomicTxRequest {
            chain_ids: vec![],
            txs: vec![scripted_sub_tx("a", &failing)],
        };
        match node.execute_atomic_tx(&request).await {
            Err(NodeError::AtomicTx { chain_id, source }) => {
                assert_eq!(chain_id, ChainId::from("a"));
                assert!(matches!(source, CoordinatorError::SubTxFailed { code: 5, .. }));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("atomic transaction should fail"),
        }
        assert!(node.registry().is_idle());
    }

    #[tokio::test]
    async fn test_shutdown_stops_pending_timeouts() {
        let engine = pong();
        let node = node(&["a"], engine.clone());
        let launcher = node.services(&ChainId::from("a")).unwrap().launcher();
        let task = launcher.start_timeout(
            node.shutdown_token(),
            TimeoutRequest {
                sender: "ticker".into(),
                request_id: RequestId::new(1),
                delay: Duration::from_secs(30),
                payload: vec![],
            },
        );

        node.shutdown().await;
        let outcome = tokio::time::timeout(Duration::from_secs(1), task.join())
            .await
            .expect("timeout task did not observe shutdown")
            .unwrap();
        assert_eq!(outcome, TaskOutcome::SkippedAtShutdown);
        assert_eq!(engine.invocation_count(), 0);
        assert!(node.shutdown_token().is_cancelled());

        let request = AtomicTxRequest {
            chain_ids: vec![],
            txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("late"))],
        };
        assert!(matches!(
            node.execute_atomic_tx(&request).await,
            Err(NodeError::AtomicTx {
                source: CoordinatorError::RegistryClosed,
                ..
            })
        ));
    }
}
