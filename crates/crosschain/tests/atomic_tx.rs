//! Atomic transaction scenarios across resident and non-resident chains.

use async_trait::async_trait;
use polychain_core::{EntryPoint, Invocation, InvocationError, ReplayInfoSource};
use polychain_crosschain::{
    AtomicTxCoordinator, CoordinatorConfig, CoordinatorError, CrossChainChannelRegistry,
    DeterminismError, InMemoryReplayStore, TimeoutError, UnauthorizedChainError,
};
use polychain_engine::{
    ChainInstance, ChainRegistry, ContractEngine, DeterministicPipeline, ExecutionContext,
    ExecutionContextBuilder, LocalChainRegistry, SharedContext, StorePartition,
};
use polychain_test_helpers::{
    call_request, chain_with_blocks, scripted_sub_tx, CannedEngine, ScriptedPipeline, ScriptedTx,
    CODE_CALL_FAILED,
};
use polychain_types::{
    AtomicTxCrossChainCallInfo, AtomicTxRequest, ChainId, Coin, CrossChainCall,
    CrossChainCallRequest, CrossChainCallResponse, Event, ExecTxResult, Hash, RequestField,
    SubTxCallInfo, SubTxEnvelope,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

struct Harness {
    registry: Arc<CrossChainChannelRegistry>,
    chains: Arc<LocalChainRegistry>,
    replay: Arc<InMemoryReplayStore>,
    engine: Arc<dyn ContractEngine>,
    pipeline: Arc<ScriptedPipeline>,
}

impl Harness {
    fn new(resident: &[&str], engine: Arc<dyn ContractEngine>) -> Self {
        let chains: LocalChainRegistry = resident.iter().map(|id| chain_with_blocks(id, 1)).collect();
        Self {
            registry: CrossChainChannelRegistry::new(),
            chains: Arc::new(chains),
            replay: Arc::new(InMemoryReplayStore::new()),
            engine,
            pipeline: Arc::new(ScriptedPipeline::new()),
        }
    }

    fn pong(resident: &[&str]) -> Self {
        Self::new(
            resident,
            Arc::new(CannedEngine::with_handler(|_, _| Ok(b"pong".to_vec()))),
        )
    }

    fn coordinator(&self, chain: &str) -> Arc<AtomicTxCoordinator> {
        AtomicTxCoordinator::new(
            ChainId::from(chain),
            self.registry.clone(),
            self.chains.clone(),
            self.engine.clone(),
            self.pipeline.clone(),
            self.replay.clone(),
            CoordinatorConfig::default(),
        )
    }

    fn chain(&self, chain: &str) -> ChainInstance {
        self.chains.chain(&ChainId::from(chain)).unwrap()
    }

    fn context(&self, chain: &str) -> SharedContext {
        self.plain_context(chain).into_shared()
    }

    fn plain_context(&self, chain: &str) -> ExecutionContext {
        let chain = self.chain(chain);
        let builder = ExecutionContextBuilder::new();
        builder
            .build_from_header(&chain, &builder.mock_header(&chain), false, CancellationToken::new())
            .unwrap()
    }
}

fn ids(ids: &[&str]) -> Vec<ChainId> {
    ids.iter().map(|id| ChainId::from(*id)).collect()
}

fn result_with_data(data: &[u8]) -> ExecTxResult {
    ExecTxResult::ok(data.to_vec())
}

#[tokio::test]
async fn test_single_resident_chain_matches_direct_execution() {
    let harness = Harness::pong(&["a"]);
    let script = ScriptedTx::ok("hello").with_event(Event::new("transfer").with_attribute("amount", "5"));
    let raw = scripted_sub_tx("a", &script);

    let direct = {
        let mut ctx = harness.plain_context("a");
        harness.pipeline.execute_sub_tx(&mut ctx, &raw).await.unwrap()
    };

    let ctx = harness.context("a");
    let request = AtomicTxRequest {
        chain_ids: vec![],
        txs: vec![raw],
    };
    let response = harness
        .coordinator("a")
        .execute_atomic_tx(&ctx, &request)
        .await
        .unwrap();

    assert_eq!(response.results, vec![direct.result]);
    let ctx = ctx.lock().await;
    assert_eq!(ctx.events(), direct.events.as_slice());
    assert_eq!(ctx.get(StorePartition::State, b"last_tx"), Some(script_body(&script)));
    assert!(ctx.cross_chain().is_none());
    drop(ctx);

    assert!(harness.registry.is_idle());
    assert!(harness.registry.current_chain_ids().is_empty());
    assert_eq!(harness.registry.channel_count(), 1);
}

fn script_body(script: &ScriptedTx) -> Vec<u8> {
    serde_json::to_vec(script).unwrap()
}

#[traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_resident_chains_with_cross_call() {
    let engine = Arc::new(CannedEngine::with_handler(|_, _| Ok(b"pong".to_vec())));
    let harness = Harness::new(&["a", "b"], engine.clone());
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![
            scripted_sub_tx("a", &ScriptedTx::ok("a:").with_call(call_request("a", "b", b"ping"))),
            scripted_sub_tx("b", &ScriptedTx::ok("b-done")),
        ],
    };

    let (a, b) = (harness.coordinator("a"), harness.coordinator("b"));
    let (ctx_a, ctx_b) = (harness.context("a"), harness.context("b"));
    let (res_a, res_b) = tokio::join!(
        a.execute_atomic_tx(&ctx_a, &request),
        b.execute_atomic_tx(&ctx_b, &request)
    );
    let (res_a, res_b) = (res_a.unwrap(), res_b.unwrap());

    let expected = vec![result_with_data(b"a:pong"), result_with_data(b"b-done")];
    assert_eq!(res_a.results, expected);
    assert_eq!(res_b.results, expected);

    let invocations = engine.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].entry_point, EntryPoint::CrossChain);
    assert_eq!(invocations[0].contract, "target");
    assert_eq!(invocations[0].caller, "caller");
    assert!(!invocations[0].background);

    assert!(harness.registry.is_idle());
    assert!(logs_contain("Atomic transaction executed"));
}

#[tokio::test]
async fn test_non_resident_chains_use_replay_results() {
    let engine = Arc::new(CannedEngine::new());
    let harness = Harness::new(&["a"], engine.clone());
    let from_b = ExecTxResult::ok(b"from-b".to_vec());
    let from_c = ExecTxResult::ok(b"from-c".to_vec());
    harness.replay.set_replay_info(
        ChainId::from("a"),
        AtomicTxCrossChainCallInfo {
            subtx: vec![
                SubTxCallInfo {
                    result: ExecTxResult::default(),
                    calls: vec![],
                },
                SubTxCallInfo {
                    result: from_b.clone(),
                    calls: vec![],
                },
                SubTxCallInfo {
                    result: from_c.clone(),
                    calls: vec![],
                },
            ],
        },
    );

    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b", "c"]),
        txs: vec![
            scripted_sub_tx("a", &ScriptedTx::ok("local")),
            scripted_sub_tx("b", &ScriptedTx::ok("never run")),
            scripted_sub_tx("c", &ScriptedTx::ok("never run")),
        ],
    };
    let response = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap();

    assert_eq!(
        response.results,
        vec![result_with_data(b"local"), from_b, from_c]
    );
    assert_eq!(harness.pipeline.executed(), vec![request.txs[0].clone()]);
    assert_eq!(engine.invocation_count(), 0);
    assert!(!harness.registry.has_channels(&ChainId::from("b")));
    assert!(!harness.registry.has_channels(&ChainId::from("c")));
    assert!(harness.registry.is_idle());
}

fn inbound_replay(recorded_response: &[u8]) -> AtomicTxCrossChainCallInfo {
    AtomicTxCrossChainCallInfo {
        subtx: vec![SubTxCallInfo {
            result: ExecTxResult::ok(b"b-result".to_vec()),
            calls: vec![CrossChainCall {
                request: call_request("b", "a", b"into-a"),
                response: CrossChainCallResponse::ok(recorded_response.to_vec()),
            }],
        }],
    }
}

#[tokio::test]
async fn test_replayed_sub_tx_executes_calls_into_this_chain() {
    let engine = Arc::new(CannedEngine::with_handler(|ctx, _| {
        ctx.set(StorePartition::State, "touched", "yes");
        Ok(b"pong".to_vec())
    }));
    let harness = Harness::new(&["a"], engine.clone());
    harness
        .replay
        .set_replay_info(ChainId::from("a"), inbound_replay(b"pong"));

    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("b", &ScriptedTx::ok("never run"))],
    };
    let ctx = harness.context("a");
    let response = harness
        .coordinator("a")
        .execute_atomic_tx(&ctx, &request)
        .await
        .unwrap();

    assert_eq!(response.results, vec![result_with_data(b"b-result")]);
    assert_eq!(engine.invocation_count(), 1);
    assert_eq!(
        ctx.lock().await.get(StorePartition::State, b"touched"),
        Some(b"yes".to_vec())
    );
}

#[tokio::test]
async fn test_replayed_sub_tx_with_diverging_response_fails() {
    let harness = Harness::pong(&["a"]);
    harness
        .replay
        .set_replay_info(ChainId::from("a"), inbound_replay(b"something else"));

    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("b", &ScriptedTx::ok("never run"))],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Determinism(DeterminismError::ResponseMismatch { index: 0 })
    ));
    assert!(harness.registry.is_idle());
}

#[tokio::test]
async fn test_missing_replay_info_is_a_determinism_error() {
    let harness = Harness::pong(&["a"]);
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("b", &ScriptedTx::ok("x"))],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Determinism(DeterminismError::MissingReplayInfo { chain_id }) if chain_id == ChainId::from("a")
    ));
}

#[tokio::test]
async fn test_second_atomic_tx_is_rejected_while_one_is_in_flight() {
    let harness = Harness::pong(&["a"]);
    let in_flight = AtomicTxRequest {
        chain_ids: ids(&["a"]),
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("first"))],
    };
    let participation = harness
        .registry
        .join(in_flight.hash(), Some(ids(&["a"])), vec![])
        .unwrap();

    let other = AtomicTxRequest {
        chain_ids: ids(&["a"]),
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("second"))],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &other)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::HashMismatch { current, incoming }
            if current == in_flight.hash() && incoming == other.hash()
    ));
    assert_eq!(harness.registry.current_atomic_tx(), Some(in_flight.hash()));

    drop(participation);
    harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &other)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_registry_resets_after_failure() {
    let harness = Harness::pong(&["a"]);
    let mut failing = ScriptedTx::ok("bad");
    failing.code = 5;
    let request = AtomicTxRequest {
        chain_ids: vec![],
        txs: vec![
            scripted_sub_tx("a", &failing),
            scripted_sub_tx("a", &ScriptedTx::ok("never reached")),
        ],
    };

    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::SubTxFailed { index: 0, code: 5, .. }));
    assert_eq!(harness.pipeline.executed().len(), 1);
    assert!(harness.registry.is_idle());
    assert!(harness.registry.current_chain_ids().is_empty());

    let next = AtomicTxRequest {
        chain_ids: vec![],
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("fine"))],
    };
    let response = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &next)
        .await
        .unwrap();
    assert_eq!(response.results, vec![result_with_data(b"fine")]);
    assert!(harness.registry.is_idle());
}

#[tokio::test]
async fn test_unauthorized_sub_tx_target() {
    let harness = Harness::pong(&["a", "b"]);
    let request = AtomicTxRequest {
        chain_ids: ids(&["a"]),
        txs: vec![
            scripted_sub_tx("a", &ScriptedTx::ok("ok")),
            scripted_sub_tx("b", &ScriptedTx::ok("not allowed")),
        ],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Unauthorized(UnauthorizedChainError { chain_id, .. }) if chain_id == ChainId::from("b")
    ));
    assert!(harness.registry.is_idle());
}

#[tokio::test]
async fn test_malformed_sub_tx_is_rejected_before_joining() {
    let harness = Harness::pong(&["a"]);
    let request = AtomicTxRequest {
        chain_ids: vec![],
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("ok")), b"garbage".to_vec()],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Envelope { index: 1, .. }));
    assert!(harness.pipeline.executed().is_empty());
    assert_eq!(harness.registry.channel_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_peer_abort_releases_waiting_chain() {
    let harness = Harness::pong(&["a", "b"]);
    let broken = SubTxEnvelope::new("b", b"not a script".to_vec()).encode();
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![broken, scripted_sub_tx("a", &ScriptedTx::ok("never reached"))],
    };

    let (a, b) = (harness.coordinator("a"), harness.coordinator("b"));
    let (ctx_a, ctx_b) = (harness.context("a"), harness.context("b"));
    let (res_a, res_b) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            a.execute_atomic_tx(&ctx_a, &request),
            b.execute_atomic_tx(&ctx_b, &request)
        )
    })
    .await
    .unwrap();

    assert!(matches!(res_b, Err(CoordinatorError::SubTxExecution { index: 0, .. })));
    assert!(matches!(
        res_a,
        Err(CoordinatorError::PeerAborted { chain_id, .. }) if chain_id == ChainId::from("b")
    ));
    assert!(harness.registry.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_sub_tx_result_reaches_other_participants() {
    let harness = Harness::pong(&["a", "b"]);
    let mut failing = ScriptedTx::ok("bad");
    failing.code = 9;
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("b", &failing)],
    };

    let (a, b) = (harness.coordinator("a"), harness.coordinator("b"));
    let (ctx_a, ctx_b) = (harness.context("a"), harness.context("b"));
    let (res_a, res_b) = tokio::join!(
        a.execute_atomic_tx(&ctx_a, &request),
        b.execute_atomic_tx(&ctx_b, &request)
    );
    assert!(matches!(res_a, Err(CoordinatorError::SubTxFailed { index: 0, code: 9, .. })));
    assert!(matches!(res_b, Err(CoordinatorError::SubTxFailed { index: 0, code: 9, .. })));
}

/// Replay log for chain "a" holding one recorded call from "a" into "b".
fn outbound_replay(request: CrossChainCallRequest) -> AtomicTxCrossChainCallInfo {
    AtomicTxCrossChainCallInfo {
        subtx: vec![SubTxCallInfo {
            result: ExecTxResult::default(),
            calls: vec![CrossChainCall {
                request,
                response: CrossChainCallResponse::ok(b"recorded".to_vec()),
            }],
        }],
    }
}

fn funded_request() -> CrossChainCallRequest {
    let mut request = call_request("a", "b", b"{\"inc\":1}");
    request.dependencies = vec!["counter".into()];
    request.funds = vec![Coin {
        denom: "amyt".into(),
        amount: 10,
    }];
    request
}

#[tokio::test]
async fn test_replayed_call_returns_recorded_response() {
    let engine = Arc::new(CannedEngine::new());
    let harness = Harness::new(&["a"], engine.clone());
    harness
        .replay
        .set_replay_info(ChainId::from("a"), outbound_replay(funded_request()));

    let a = harness.coordinator("a");
    let _participation = harness
        .registry
        .join(Hash::ZERO, Some(ids(&["a", "b"])), vec![])
        .unwrap();
    let mut ctx = harness.plain_context("a");

    for _ in 0..2 {
        harness.registry.begin_sub_tx(&ChainId::from("a"), 0);
        let response = a
            .execute_cross_chain_tx(&mut ctx, funded_request())
            .await
            .unwrap();
        assert_eq!(response, CrossChainCallResponse::ok(b"recorded".to_vec()));
    }
    assert_eq!(engine.invocation_count(), 0);

    // The recorded log has a single call.
    let err = a
        .execute_cross_chain_tx(&mut ctx, funded_request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Determinism(DeterminismError::CallOutOfRange { index: 1, available: 1, .. })
    ));
}

#[tokio::test]
async fn test_replayed_call_rejects_any_mutated_field() {
    let harness = Harness::pong(&["a"]);
    harness
        .replay
        .set_replay_info(ChainId::from("a"), outbound_replay(funded_request()));
    let a = harness.coordinator("a");
    let _participation = harness
        .registry
        .join(Hash::ZERO, Some(ids(&["a", "b", "c"])), vec![])
        .unwrap();
    let mut ctx = harness.plain_context("a");

    // "c" is authorized but not resident, so both chain id mutations still
    // reach the replay log.
    let mutations: [(RequestField, fn(&mut CrossChainCallRequest)); 8] = [
        (RequestField::From, |r| r.from.push('x')),
        (RequestField::FromChainId, |r| r.from_chain_id = ChainId::from("c")),
        (RequestField::To, |r| r.to = "other".into()),
        (RequestField::ToChainId, |r| r.to_chain_id = ChainId::from("c")),
        (RequestField::IsQuery, |r| r.is_query = true),
        (RequestField::Msg, |r| r.msg.push(b' ')),
        (RequestField::Dependencies, |r| r.dependencies.clear()),
        (RequestField::Funds, |r| r.funds[0].amount += 1),
    ];
    for (field, mutate) in mutations {
        harness.registry.begin_sub_tx(&ChainId::from("a"), 0);
        let mut request = funded_request();
        mutate(&mut request);
        let err = a.execute_cross_chain_tx(&mut ctx, request).await.unwrap_err();
        assert!(
            matches!(
                err,
                CoordinatorError::Determinism(DeterminismError::RequestMismatch { index: 0, field: f }) if f == field
            ),
            "mutating {field} gave {err:?}"
        );
    }
}

#[tokio::test]
async fn test_replay_mismatch_fails_the_atomic_tx() {
    let harness = Harness::pong(&["a"]);
    harness
        .replay
        .set_replay_info(ChainId::from("a"), outbound_replay(funded_request()));

    let mut diverging = funded_request();
    diverging.msg = b"{\"inc\":2}".to_vec();
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("a:").with_call(diverging))],
    };
    let err = harness
        .coordinator("a")
        .execute_atomic_tx(&harness.context("a"), &request)
        .await
        .unwrap_err();

    match err {
        CoordinatorError::SubTxFailed { index, code, log } => {
            assert_eq!((index, code), (0, CODE_CALL_FAILED));
            assert!(log.contains("field msg differs"), "{log}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_cross_call_preconditions() {
    let harness = Harness::pong(&["a", "b"]);
    let a = harness.coordinator("a");
    let mut ctx = harness.plain_context("a");

    let err = a
        .execute_cross_chain_tx(&mut ctx, call_request("a", "b", b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NoAtomicTxInFlight));

    let _participation = harness
        .registry
        .join(Hash::ZERO, Some(ids(&["a"])), vec![])
        .unwrap();
    let mut request = call_request("a", "b", b"x");
    request.timeout_ms = 0;
    let err = a.execute_cross_chain_tx(&mut ctx, request).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::ZeroTimeout));

    let err = a
        .execute_cross_chain_tx(&mut ctx, call_request("a", "b", b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Unauthorized(UnauthorizedChainError { chain_id, .. }) if chain_id == ChainId::from("b")
    ));
}

/// Answers with the call's message, after a delay when the message is
/// `slow`.
/// Answers `callback` by calling back into the caller's chain with
/// `inner`, which records the chain it ran on and answers `inner-ok`.
struct CallbackEngine;

#[async_trait]
impl ContractEngine for CallbackEngine {
    async fn invoke_entry_point(
        &self,
        ctx: &mut ExecutionContext,
        invocation: Invocation,
    ) -> Result<Vec<u8>, InvocationError> {
        let request: CrossChainCallRequest = serde_json::from_slice(&invocation.payload)
            .map_err(|e| InvocationError::Contract(e.to_string()))?;
        if request.msg != b"callback" {
            let chain = ctx.chain_id().to_string();
            ctx.set(StorePartition::State, "inner_ran_on", chain);
            return Ok(b"inner-ok".to_vec());
        }

        let caller = ctx
            .cross_chain()
            .ok_or_else(|| InvocationError::Contract("no atomic transaction".into()))?;
        let back = call_request(
            ctx.chain_id().as_str(),
            request.from_chain_id.as_str(),
            b"inner",
        );
        let response = caller.call(ctx, back).await?;
        let mut data = b"b+".to_vec();
        data.extend_from_slice(&response.data);
        Ok(data)
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_back_into_waiting_chain() {
    let harness = Harness::new(&["a", "b"], Arc::new(CallbackEngine));
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx(
            "a",
            &ScriptedTx::ok("a:").with_call(call_request("a", "b", b"callback")),
        )],
    };

    let (a, b) = (harness.coordinator("a"), harness.coordinator("b"));
    let (ctx_a, ctx_b) = (harness.context("a"), harness.context("b"));
    let started = Instant::now();
    let (res_a, res_b) = tokio::join!(
        a.execute_atomic_tx(&ctx_a, &request),
        b.execute_atomic_tx(&ctx_b, &request)
    );
    let elapsed = started.elapsed();

    let expected = vec![result_with_data(b"a:b+inner-ok")];
    assert_eq!(res_a.unwrap().results, expected);
    assert_eq!(res_b.unwrap().results, expected);
    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");

    // The call back ran on a's live context, not on b's.
    assert_eq!(
        ctx_a.lock().await.get(StorePartition::State, b"inner_ran_on"),
        Some(b"a".to_vec())
    );
    assert_eq!(ctx_b.lock().await.get(StorePartition::State, b"inner_ran_on"), None);

    assert!(logs_contain("Serving nested cross-chain call inline"));
    assert!(harness.registry.is_idle());
}

struct SlowOnRequestEngine;

#[async_trait]
impl ContractEngine for SlowOnRequestEngine {
    async fn invoke_entry_point(
        &self,
        _ctx: &mut ExecutionContext,
        invocation: Invocation,
    ) -> Result<Vec<u8>, InvocationError> {
        let request: CrossChainCallRequest = serde_json::from_slice(&invocation.payload)
            .map_err(|e| InvocationError::Contract(e.to_string()))?;
        if request.msg == b"slow" {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(request.msg)
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_and_late_response() {
    let harness = Harness::new(&["a", "b"], Arc::new(SlowOnRequestEngine));

    // Chain "b" takes part and waits for sub-transaction 0 of "a", serving
    // calls in the meantime.
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![scripted_sub_tx("a", &ScriptedTx::ok("a"))],
    };
    let participation = harness
        .registry
        .join(request.hash(), Some(ids(&["a", "b"])), vec![])
        .unwrap();
    let b = harness.coordinator("b");
    let ctx_b = harness.context("b");
    let serving = {
        let request = request.clone();
        tokio::spawn(async move { b.execute_atomic_tx(&ctx_b, &request).await })
    };

    let a = harness.coordinator("a");
    let mut ctx = harness.plain_context("a");
    harness.registry.begin_sub_tx(&ChainId::from("a"), 0);

    let mut slow = call_request("a", "b", b"slow");
    slow.timeout_ms = 100;
    let started = Instant::now();
    let err = a.execute_cross_chain_tx(&mut ctx, slow).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(
        err,
        CoordinatorError::Timeout(TimeoutError { timeout_ms: 100, .. })
    ));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");

    // The late answer to the slow call must not be taken for this one.
    let response = a
        .execute_cross_chain_tx(&mut ctx, call_request("a", "b", b"fast"))
        .await
        .unwrap();
    assert_eq!(response, CrossChainCallResponse::ok(b"fast".to_vec()));
    assert!(logs_contain("Dropping stale cross-chain response"));

    harness
        .registry
        .channels(&ChainId::from("a"))
        .unwrap()
        .publish(request.hash(), &[Some(result_with_data(b"a"))]);
    let response = serving.await.unwrap().unwrap();
    assert_eq!(response.results, vec![result_with_data(b"a")]);

    drop(participation);
    assert!(harness.registry.is_idle());
}

#[tokio::test]
async fn test_timeout_against_silent_chain() {
    let harness = Harness::pong(&["a", "b"]);
    let a = harness.coordinator("a");
    let _participation = harness
        .registry
        .join(Hash::ZERO, Some(ids(&["a", "b"])), vec![])
        .unwrap();
    let mut ctx = harness.plain_context("a");

    let mut request = call_request("a", "b", b"x");
    request.timeout_ms = 50;
    let started = Instant::now();
    let err = a.execute_cross_chain_tx(&mut ctx, request).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_query_calls_into_own_chain_leave_no_writes() {
    let engine = Arc::new(CannedEngine::with_handler(|ctx, _| {
        ctx.set(StorePartition::State, "written", "1");
        Ok(vec![])
    }));
    let harness = Harness::new(&["a"], engine);
    let a = harness.coordinator("a");
    let _participation = harness
        .registry
        .join(Hash::ZERO, Some(ids(&["a"])), vec![])
        .unwrap();
    let mut ctx = harness.plain_context("a");

    let mut query = call_request("a", "a", b"q");
    query.is_query = true;
    a.execute_cross_chain_tx(&mut ctx, query).await.unwrap();
    assert_eq!(ctx.get(StorePartition::State, b"written"), None);

    a.execute_cross_chain_tx(&mut ctx, call_request("a", "a", b"w"))
        .await
        .unwrap();
    assert_eq!(ctx.get(StorePartition::State, b"written"), Some(b"1".to_vec()));
}

#[tokio::test]
async fn test_shutdown_does_not_abandon_a_waiting_call() {
    let harness = Harness::new(&["a", "b"], Arc::new(SlowOnRequestEngine));
    let request = AtomicTxRequest {
        chain_ids: ids(&["a", "b"]),
        txs: vec![
            scripted_sub_tx("a", &ScriptedTx::ok("a:").with_call(call_request("a", "b", b"slow"))),
        ],
    };

    let cancel = CancellationToken::new();
    let chain_a = harness.chain("a");
    let builder = ExecutionContextBuilder::new();
    let ctx_a = builder
        .build_from_header(&chain_a, &builder.mock_header(&chain_a), false, cancel.clone())
        .unwrap()
        .into_shared();
    let ctx_b = harness.context("b");
    let (a, b) = (harness.coordinator("a"), harness.coordinator("b"));

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    };
    let (res_a, res_b, ()) = tokio::join!(
        a.execute_atomic_tx(&ctx_a, &request),
        b.execute_atomic_tx(&ctx_b, &request),
        trigger
    );

    assert_eq!(res_a.unwrap().results, vec![result_with_data(b"a:slow")]);
    assert_eq!(res_b.unwrap().results, vec![result_with_data(b"a:slow")]);
}
