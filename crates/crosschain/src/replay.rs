//! Replaying precomputed cross-chain calls for non-resident chains.
//!
//! A node that lacks some participant of an atomic transaction cannot run
//! that chain's sub-transactions or serve calls into it. It consumes the
//! replay log recorded by the proposer instead:
//!
//! ```text
//! sub-tx on non-resident chain C            call from A into non-resident C
//! ──────────────────────────────            ───────────────────────────────
//! log[subtx].calls ── authorize all         log[subtx].calls[index]
//!        │                                         │
//!  first call C ─► A ── run for real         request == recorded? ── no ─► DeterminismError
//!        │              (response must             │ yes
//!        │               equal recorded)     nested call C ─► A ── run for real
//!        ▼                                         ▼
//! log[subtx].result                          recorded response
//! ```
//!
//! Calls that C makes back into this chain would have run inline during the
//! real execution, so they are executed here for real too and their
//! responses checked against the log.

use crate::{AtomicTxCoordinator, CoordinatorError, DeterminismError};
use polychain_engine::{ExecutionContext, SharedContext};
use polychain_types::{
    AtomicTxCrossChainCallInfo, CallKey, CrossChainCallRequest, CrossChainCallResponse,
    ExecTxResult, SubTxCallInfo,
};
use tracing::debug;

impl AtomicTxCoordinator {
    /// Accept the recorded result of sub-transaction `index`, executing
    /// the call it made into this chain.
    pub(crate) async fn replay_sub_tx(
        &self,
        ctx: &SharedContext,
        index: usize,
    ) -> Result<ExecTxResult, CoordinatorError> {
        let info = self.replay_info()?;
        let sub = sub_tx(&info, index)?;

        for call in &sub.calls {
            self.registry
                .authorize([&call.request.from_chain_id, &call.request.to_chain_id])?;
        }

        let inbound = sub
            .calls
            .iter()
            .enumerate()
            .find(|(_, call)| call.request.to_chain_id == self.chain_id);
        if let Some((position, call)) = inbound {
            debug!(
                chain_id = %self.chain_id,
                subtx = index,
                crosschaincall_index = position,
                "Replaying recorded call into this chain"
            );
            self.registry.seek_cross_call(&self.chain_id, position);
            let response = {
                let mut guard = ctx.lock().await;
                self.execute_cross_chain_tx(&mut guard, call.request.clone())
                    .await?
            };
            if response != call.response {
                return Err(DeterminismError::ResponseMismatch { index: position }.into());
            }
        }

        debug!(chain_id = %self.chain_id, subtx = index, "Accepted recorded sub-transaction result");
        Ok(sub.result.clone())
    }

    /// Answer a call into a non-resident chain from the replay log.
    pub(crate) async fn replay_call(
        &self,
        ctx: &mut ExecutionContext,
        key: &CallKey,
        request: &CrossChainCallRequest,
    ) -> Result<CrossChainCallResponse, CoordinatorError> {
        let info = self.replay_info()?;
        let sub = sub_tx(&info, key.sub_tx_index)?;
        let recorded = sub
            .calls
            .get(key.index)
            .ok_or(DeterminismError::CallOutOfRange {
                sub_tx: key.sub_tx_index,
                index: key.index,
                available: sub.calls.len(),
            })?;

        if let Some(field) = request.first_mismatch(&recorded.request) {
            return Err(DeterminismError::RequestMismatch {
                index: key.index,
                field,
            }
            .into());
        }

        // Calls the target made while serving this one. The next call issued
        // by this chain ends them.
        for (position, nested) in sub.calls.iter().enumerate().skip(key.index + 1) {
            if nested.request.from_chain_id == self.chain_id {
                break;
            }
            if nested.request.to_chain_id != self.chain_id {
                continue;
            }
            debug!(
                chain_id = %self.chain_id,
                subtx = key.sub_tx_index,
                crosschaincall_index = position,
                "Replaying nested call into this chain"
            );
            self.registry.seek_cross_call(&self.chain_id, position);
            let response = self
                .execute_cross_chain_tx(ctx, nested.request.clone())
                .await?;
            if response != nested.response {
                return Err(DeterminismError::ResponseMismatch { index: position }.into());
            }
            break;
        }

        Ok(recorded.response.clone())
    }

    fn replay_info(&self) -> Result<AtomicTxCrossChainCallInfo, DeterminismError> {
        self.replay
            .replay_info(&self.chain_id)
            .ok_or_else(|| DeterminismError::MissingReplayInfo {
                chain_id: self.chain_id.clone(),
            })
    }
}

fn sub_tx(info: &AtomicTxCrossChainCallInfo, index: usize) -> Result<&SubTxCallInfo, DeterminismError> {
    info.sub_tx(index).ok_or(DeterminismError::SubTxOutOfRange {
        sub_tx: index,
        available: info.subtx.len(),
    })
}
