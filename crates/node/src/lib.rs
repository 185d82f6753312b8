//! Node assembly for polychain.
//!
//! Reads a [`NodeConfig`] and wires, per hosted chain, an
//! [`ActionExecutor`](polychain_execution::ActionExecutor), an
//! [`AsyncTaskLauncher`](polychain_production::AsyncTaskLauncher) and an
//! [`AtomicTxCoordinator`](polychain_crosschain::AtomicTxCoordinator).

mod config;
mod error;
mod node;

pub use config::{ChainConfig, NodeConfig};
pub use error::{ConfigError, NodeError};
pub use node::{ChainServices, Collaborators, Node, ParticipantOutcome};
