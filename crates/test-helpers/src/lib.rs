//! Test doubles and fixtures for polychain.
//!
//! - [`CannedEngine`]: a `ContractEngine` answering from a closure and
//!   recording every invocation
//! - [`ScriptedPipeline`]: a `DeterministicPipeline` whose sub-transactions
//!   are JSON [`ScriptedTx`] scripts, including the cross-chain calls to make
//! - fixtures for chains, sub-transactions and call requests

mod engine;
mod fixtures;
mod pipeline;

pub use engine::CannedEngine;
pub use fixtures::{call_request, chain_with_blocks, scripted_sub_tx};
pub use pipeline::{ScriptedPipeline, ScriptedTx, CODE_CALL_FAILED, CODE_CALL_REJECTED};
