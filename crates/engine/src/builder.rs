//! Building and committing execution contexts.

use crate::{
    ChainInstance, ContextError, ExecutionContext, InvalidHeightError, StoreOverlay, StoreWrite,
};
use polychain_types::{BlockHeader, MOCK_PROPOSER};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Builds isolated, overlayed execution contexts from a chain's committed
/// state and commits their out-of-band side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContextBuilder;

impl ExecutionContextBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Build a context over `chain`'s state at `header.height`.
    ///
    /// Height 0 means the current tip. When the header is not at the tip, or
    /// carries no time, the context time is pinned to the commit time
    /// recorded for that height (if any).
    pub fn build_from_header(
        &self,
        chain: &ChainInstance,
        header: &BlockHeader,
        prove: bool,
        cancel: CancellationToken,
    ) -> Result<ExecutionContext, ContextError> {
        let tip = chain.tip().0;
        if header.height < 0 {
            return Err(InvalidHeightError::Negative {
                height: header.height,
            }
            .into());
        }
        let requested = header.height as u64;
        if requested > tip {
            return Err(InvalidHeightError::Future {
                height: header.height,
                tip,
            }
            .into());
        }
        if prove && header.height <= 1 {
            return Err(InvalidHeightError::ProofUnavailable {
                height: header.height,
            }
            .into());
        }

        let height = if requested == 0 { tip } else { requested };
        let state = chain
            .store()
            .state_at(height)
            .ok_or_else(|| ContextError::StateUnavailable {
                chain_id: chain.id().clone(),
                height,
            })?;

        let mut header = header.clone();
        header.chain_id = chain.id().clone();
        header.height = height as i64;
        if height != tip || !header.has_time() {
            if let Some(info) = chain.store().commit_info(height) {
                trace!(
                    chain_id = %chain.id(),
                    height,
                    timestamp_ms = info.timestamp_ms,
                    "Pinning context time to commit info"
                );
                header.timestamp_ms = info.timestamp_ms;
            }
        }

        Ok(ExecutionContext::new(header, StoreOverlay::new(state), cancel))
    }

    /// Flush `ctx` into `chain`.
    ///
    /// Only the consensus partitions are written; writes to any other
    /// partition are dropped, since those are committed exclusively by the
    /// deterministic pipeline. Returns the number of writes applied.
    pub fn commit(&self, chain: &ChainInstance, ctx: ExecutionContext) -> Result<usize, ContextError> {
        if ctx.chain_id() != chain.id() {
            return Err(ContextError::ChainMismatch {
                context: ctx.chain_id().clone(),
                chain: chain.id().clone(),
            });
        }
        let pending = ctx.pending_writes();
        let (_, overlay) = ctx.into_parts();
        let writes: Vec<StoreWrite> = overlay
            .into_writes()
            .into_iter()
            .filter(|w| w.partition.accepts_out_of_band())
            .collect();
        let skipped = pending - writes.len();
        let applied = chain.store().apply(writes);
        debug!(chain_id = %chain.id(), applied, skipped, "Committed execution context");
        Ok(applied)
    }

    /// Header synthesized from the chain's current tip.
    ///
    /// Used when no committed header is queryable yet, or when "latest"
    /// suffices.
    pub fn mock_header(&self, chain: &ChainInstance) -> BlockHeader {
        BlockHeader {
            chain_id: chain.id().clone(),
            height: chain.tip().as_i64(),
            timestamp_ms: now_ms(),
            app_hash: chain.store().last_commit_hash(),
            proposer: MOCK_PROPOSER.to_string(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
