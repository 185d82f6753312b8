//! Runtime services for the polychain node.
//!
//! - [`AsyncTaskLauncher`]: fire-and-forget timeouts, inbound peer messages
//!   and reentrant calls, each run through the chain's `ActionExecutor`
//! - [`SupervisedTask`] / [`race`]: the spawn-and-race pattern those jobs
//!   share
//! - [`init_telemetry`]: tracing subscriber setup

mod config;
mod error;
mod launcher;
mod tasks;
mod telemetry;

pub use config::LauncherConfig;
pub use error::LaunchError;
pub use launcher::{
    AsyncTaskLauncher, InboundMessage, ReentryRequest, TaskOutcome, TimeoutRequest,
};
pub use tasks::{race, RaceOutcome, SupervisedTask};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
