//! Tracing subscriber initialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Default filter when neither the configuration nor `RUST_LOG` sets one.
const DEFAULT_FILTER: &str = "info,polychain=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Configuration for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directives (`RUST_LOG` syntax). Falls back to `RUST_LOG`,
    /// then to `info,polychain=debug`.
    pub filter: Option<String>,
    /// Colored output.
    pub ansi: bool,
    /// Include thread ids in every line.
    pub thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: None,
            ansi: true,
            thread_ids: false,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if one is already installed; the existing one stays in place.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match &config.filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(config.ansi)
        .with_thread_ids(config.thread_ids);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| TelemetryError::AlreadyInitialized)
}
