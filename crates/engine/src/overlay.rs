//! Overlay store for out-of-band execution.
//!
//! This module provides `StoreOverlay`, which wraps a committed state snapshot
//! and captures all writes without modifying the chain's store. An execution
//! context is committed by flushing the overlay's writes; it is discarded by
//! dropping the overlay.

use crate::{CommittedState, StorePartition, StoreWrite};
use indexmap::IndexMap;

/// An overlay that captures writes without modifying the underlying state.
///
/// Reads check the overlay first, then fall through to the base snapshot.
/// Writes only go to the overlay and are discarded when the overlay is dropped.
///
/// Cloning an overlay yields an independent branch: the clone sees every
/// write made so far, and writes to either side are invisible to the other.
///
/// # Example
///
/// ```ignore
/// let mut overlay = StoreOverlay::new(chain.store().state_at(tip).unwrap());
/// overlay.set(StorePartition::SingleConsensus, b"k".to_vec(), b"v".to_vec());
///
/// // overlay is dropped here - the chain's store is unchanged
/// ```
#[derive(Debug, Clone)]
pub struct StoreOverlay {
    /// The committed snapshot (read-only).
    base: CommittedState,

    /// Pending writes per partition, in write order. `None` marks a deletion
    /// so lookups return nothing even if the key exists in the base.
    writes: IndexMap<StorePartition, IndexMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl StoreOverlay {
    /// Create a new overlay over the given snapshot.
    pub fn new(base: CommittedState) -> Self {
        Self {
            base,
            writes: IndexMap::new(),
        }
    }

    /// Read a key through the overlay.
    pub fn get(&self, partition: StorePartition, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(pending) = self.writes.get(&partition).and_then(|w| w.get(key)) {
            return pending.clone();
        }
        self.base.get(partition, key).cloned()
    }

    /// Write a key.
    pub fn set(&mut self, partition: StorePartition, key: Vec<u8>, value: Vec<u8>) {
        self.writes
            .entry(partition)
            .or_default()
            .insert(key, Some(value));
    }

    /// Delete a key.
    pub fn delete(&mut self, partition: StorePartition, key: Vec<u8>) {
        self.writes.entry(partition).or_default().insert(key, None);
    }

    /// Number of pending writes across all partitions.
    pub fn pending_writes(&self) -> usize {
        self.writes.values().map(IndexMap::len).sum()
    }

    /// Consume the overlay, returning its writes in partition and write order.
    pub fn into_writes(self) -> Vec<StoreWrite> {
        self.writes
            .into_iter()
            .flat_map(|(partition, writes)| {
                writes.into_iter().map(move |(key, value)| StoreWrite {
                    partition,
                    key,
                    value,
                })
            })
            .collect()
    }
}
