//! Scripted deterministic pipeline.

use async_trait::async_trait;
use parking_lot::Mutex;
use polychain_core::InvocationError;
use polychain_engine::{DeterministicPipeline, ExecutionContext, StorePartition, SubTxOutcome};
use polychain_types::{CrossChainCallRequest, Event, ExecTxResult, SubTxEnvelope};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result code of a script whose cross-chain call could not be made.
pub const CODE_CALL_FAILED: u32 = 3;

/// Result code of a script whose cross-chain call answered with an error.
pub const CODE_CALL_REJECTED: u32 = 4;

/// Body of a scripted sub-transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedTx {
    /// Result data before any call responses are appended.
    pub data: Vec<u8>,

    /// Result code to report when every call succeeds.
    pub code: u32,

    /// Cross-chain calls to make, in order.
    pub calls: Vec<CrossChainCallRequest>,

    /// Events to emit.
    pub events: Vec<Event>,
}

impl ScriptedTx {
    /// Script that succeeds with `data`.
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Add a cross-chain call.
    pub fn with_call(mut self, call: CrossChainCallRequest) -> Self {
        self.calls.push(call);
        self
    }

    /// Add an event.
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

/// A `DeterministicPipeline` executing [`ScriptedTx`] bodies.
///
/// Each call response's data is appended to the result data. The executed
/// body is written under `last_tx` in the state partition.
#[derive(Default)]
pub struct ScriptedPipeline {
    executed: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedPipeline {
    /// Create a pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw sub-transactions executed so far.
    pub fn executed(&self) -> Vec<Vec<u8>> {
        self.executed.lock().clone()
    }

    fn failed(code: u32, log: String, events: Vec<Event>) -> SubTxOutcome {
        let mut result = ExecTxResult::failed(code, log);
        result.events = events.clone();
        SubTxOutcome { events, result }
    }
}

#[async_trait]
impl DeterministicPipeline for ScriptedPipeline {
    async fn execute_sub_tx(
        &self,
        ctx: &mut ExecutionContext,
        raw: &[u8],
    ) -> Result<SubTxOutcome, InvocationError> {
        self.executed.lock().push(raw.to_vec());
        let envelope =
            SubTxEnvelope::decode(raw).map_err(|e| InvocationError::Contract(e.to_string()))?;
        let script: ScriptedTx = serde_json::from_slice(&envelope.body)
            .map_err(|e| InvocationError::Contract(e.to_string()))?;

        let mut data = script.data.clone();
        for call in script.calls {
            let Some(caller) = ctx.cross_chain() else {
                return Ok(Self::failed(
                    CODE_CALL_FAILED,
                    "no atomic transaction in flight".into(),
                    script.events,
                ));
            };
            match caller.call(ctx, call).await {
                Ok(response) if response.is_error() => {
                    return Ok(Self::failed(CODE_CALL_REJECTED, response.error, script.events));
                }
                Ok(response) => data.extend_from_slice(&response.data),
                Err(e) => {
                    debug!(error = %e, "Scripted cross-chain call failed");
                    return Ok(Self::failed(CODE_CALL_FAILED, e.to_string(), script.events));
                }
            }
        }

        ctx.set(StorePartition::State, "last_tx", envelope.body);
        let result = ExecTxResult {
            code: script.code,
            data,
            events: script.events.clone(),
            ..Default::default()
        };
        Ok(SubTxOutcome {
            events: script.events,
            result,
        })
    }
}
