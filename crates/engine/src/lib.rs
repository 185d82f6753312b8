//! Chain state and contract engine integration.
//!
//! This crate owns everything an out-of-band invocation touches:
//!
//! - [`ChainInstance`] / [`CommitStore`]: a chain's committed partitions and
//!   commit history
//! - [`StoreOverlay`] / [`ExecutionContext`]: the discardable view an
//!   invocation runs against
//! - [`ExecutionContextBuilder`]: builds contexts at a historical header and
//!   commits their out-of-band side effects
//! - collaborator traits ([`ContractEngine`], [`DeterministicPipeline`],
//!   [`CrossChainCaller`], [`HeaderSource`], [`ChainRegistry`]) with the
//!   in-process implementations [`CommitHistoryHeaders`] and
//!   [`LocalChainRegistry`]

mod builder;
mod context;
mod error;
mod headers;
mod overlay;
mod registry;
mod store;
mod traits;

pub use builder::ExecutionContextBuilder;
pub use context::{ExecutionContext, SharedContext};
pub use error::{ContextError, HeaderError, InvalidHeightError, RegistryError};
pub use headers::CommitHistoryHeaders;
pub use overlay::StoreOverlay;
pub use registry::LocalChainRegistry;
pub use store::{ChainInstance, CommitStore, CommittedState, StorePartition, StoreWrite};
pub use traits::{
    ChainRegistry, ContractEngine, CrossChainCaller, DeterministicPipeline, HeaderSource,
    SubTxOutcome,
};
