//! Launcher configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`AsyncTaskLauncher`](crate::AsyncTaskLauncher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Run timers and reentry against a header synthesized from the tip
    /// while the chain has no committed block, instead of failing on the
    /// missing header.
    pub mock_header_before_first_commit: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            mock_header_before_first_commit: true,
        }
    }
}
