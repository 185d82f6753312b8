//! Node configuration.

use crate::ConfigError;
use polychain_crosschain::CoordinatorConfig;
use polychain_production::{LauncherConfig, TelemetryConfig};
use polychain_types::ChainId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A chain instance hosted by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
}

/// Top-level node configuration, read from TOML.
///
/// ```toml
/// [[chains]]
/// id = "mythos"
///
/// [crosschain]
/// drain_poll_ms = 100
///
/// [telemetry]
/// filter = "info,polychain=debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hosted chains, in start order.
    pub chains: Vec<ChainConfig>,
    pub crosschain: CoordinatorConfig,
    pub launcher: LauncherConfig,
    pub telemetry: TelemetryConfig,
}

impl NodeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check that at least one chain is hosted and ids are unique and
    /// non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.id.as_str().is_empty() {
                return Err(ConfigError::EmptyChainId);
            }
            if !seen.insert(&chain.id) {
                return Err(ConfigError::DuplicateChain(chain.id.clone()));
            }
        }
        Ok(())
    }

    /// Ids of the hosted chains, in start order.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.iter().map(|c| c.id.clone()).collect()
    }
}
