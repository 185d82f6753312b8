//! Out-of-band execution.
//!
//! This crate provides the [`ActionExecutor`], one per chain instance, which
//! serializes every contract invocation that does not come from the
//! deterministic block pipeline and commits its side effects only on
//! success. Optional [`ExecutionHooks`] run around each invocation.

mod error;
mod executor;
mod hooks;

pub use error::ExecutorError;
pub use executor::ActionExecutor;
pub use hooks::ExecutionHooks;
