//! Atomic cross-chain transactions for a multi-chain node.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────── CrossChainChannelRegistry ────────────┐
//!                   │  in-flight tx: hash, chain ids, per-chain indices │
//!                   │  per chain: results (watch)                       │
//!                   │             requests / responses (mpsc, 1 slot)   │
//!                   └─────▲──────────────────────────────────▲──────────┘
//!                         │                                  │
//!  AtomicTxCoordinator(A) │                                  │ AtomicTxCoordinator(B)
//!  ───────────────────────┴──                              ──┴───────────────────────
//!  sub-tx on A: pipeline, publish ───── results(A) ─────► await result
//!  call A ─► B:  request ─────────────── requests(B) ────► call server(B) ─► engine
//!                wait (timeout) ◄─────── responses(B) ◄──── response
//!  sub-tx / call on non-resident C: replay log (ReplayInfoSource)
//! ```
//!
//! Every chain hosted by the node runs its own [`AtomicTxCoordinator`] over
//! the same atomic transaction; they meet in the shared
//! [`CrossChainChannelRegistry`]. Chains the node does not host are
//! reproduced from the proposer's replay log, checked call by call
//! ([`DeterminismError`]).
//!
//! At most one atomic transaction is in flight per registry. The registry
//! returns to Idle when the last local coordinator finishes, whatever the
//! outcome.

mod config;
mod coordinator;
mod error;
mod registry;
mod replay;
mod replay_store;
mod server;

pub use config::CoordinatorConfig;
pub use coordinator::AtomicTxCoordinator;
pub use error::{CoordinatorError, DeterminismError, TimeoutError, UnauthorizedChainError};
pub use registry::{ChainChannels, CrossChainChannelRegistry, Participation, PublishedResults};
pub use replay_store::InMemoryReplayStore;
