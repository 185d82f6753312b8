//! Configuration for atomic transaction coordination.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cross-chain channel registry and coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How often a closing registry re-checks for an in-flight transaction.
    pub drain_poll_ms: u64,

    /// Upper bound applied to cross-chain call timeouts.
    ///
    /// Requests asking for longer are clamped; zero disables the bound.
    pub max_call_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: 100,
            max_call_timeout_ms: 0,
        }
    }
}

impl CoordinatorConfig {
    /// Drain poll interval as a duration.
    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    /// Effective timeout for a call requesting `timeout_ms`.
    pub fn effective_timeout(&self, timeout_ms: u64) -> Duration {
        let ms = if self.max_call_timeout_ms == 0 {
            timeout_ms
        } else {
            timeout_ms.min(self.max_call_timeout_ms)
        };
        Duration::from_millis(ms)
    }
}
