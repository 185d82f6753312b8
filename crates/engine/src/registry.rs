//! Process-wide registry of hosted chain instances.

use crate::{ChainInstance, ChainRegistry, RegistryError};
use indexmap::IndexMap;
use polychain_types::ChainId;

/// Chains hosted by this node, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct LocalChainRegistry {
    chains: IndexMap<ChainId, ChainInstance>,
}

impl LocalChainRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `chain`. A chain with the same id is replaced.
    pub fn insert(&mut self, chain: ChainInstance) {
        self.chains.insert(chain.id().clone(), chain);
    }

    /// Number of hosted chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether no chain is hosted.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl FromIterator<ChainInstance> for LocalChainRegistry {
    fn from_iter<I: IntoIterator<Item = ChainInstance>>(iter: I) -> Self {
        let mut registry = Self::new();
        for chain in iter {
            registry.insert(chain);
        }
        registry
    }
}

impl ChainRegistry for LocalChainRegistry {
    fn chain(&self, id: &ChainId) -> Result<ChainInstance, RegistryError> {
        self.chains
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChain(id.clone()))
    }

    fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().cloned().collect()
    }
}
