//! Fixtures.

use crate::ScriptedTx;
use polychain_engine::ChainInstance;
use polychain_types::{ChainId, CrossChainCallRequest, SubTxEnvelope};

/// Chain instance with `blocks` empty blocks committed, block `i` at
/// `i * 1000` ms.
pub fn chain_with_blocks(id: &str, blocks: u64) -> ChainInstance {
    let chain = ChainInstance::new(id);
    for i in 1..=blocks {
        chain.store().commit_block([], i * 1_000);
    }
    chain
}

/// Raw sub-transaction running `script` on `chain_id`.
pub fn scripted_sub_tx(chain_id: &str, script: &ScriptedTx) -> Vec<u8> {
    let body = serde_json::to_vec(script).unwrap_or_default();
    SubTxEnvelope::new(chain_id, body).encode()
}

/// Non-query call from `caller` on `from` to `target` on `to`, with a
/// 2000 ms timeout.
pub fn call_request(from: &str, to: &str, msg: &[u8]) -> CrossChainCallRequest {
    CrossChainCallRequest {
        from: "caller".into(),
        from_chain_id: ChainId::from(from),
        to: "target".into(),
        to_chain_id: ChainId::from(to),
        msg: msg.to_vec(),
        is_query: false,
        timeout_ms: 2_000,
        dependencies: Vec::new(),
        funds: Vec::new(),
    }
}
