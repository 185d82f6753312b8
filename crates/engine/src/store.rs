//! Committed chain state.
//!
//! Every chain instance owns a [`CommitStore`]: a set of key/value partitions
//! plus the header and commit info of every committed height. Partitions are
//! persistent maps, so taking a snapshot for an execution context is O(1)
//! and historical snapshots share structure with the current state.

use im::OrdMap;
use parking_lot::RwLock;
use polychain_types::{BlockHeader, BlockHeight, ChainId, CommitInfo, Hash, MOCK_PROPOSER};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Storage partition of a chain.
///
/// Only the deterministic pipeline writes [`StorePartition::State`].
/// Out-of-band execution may persist side effects into the two consensus
/// partitions only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorePartition {
    /// Application state, committed per block.
    State,
    /// Consensus metadata shared across chains.
    MetaConsensus,
    /// Node-local consensus storage.
    SingleConsensus,
}

impl StorePartition {
    /// All partitions, in storage order.
    pub const ALL: [StorePartition; 3] = [
        StorePartition::State,
        StorePartition::MetaConsensus,
        StorePartition::SingleConsensus,
    ];

    /// Whether out-of-band execution may commit into this partition.
    pub fn accepts_out_of_band(self) -> bool {
        matches!(
            self,
            StorePartition::MetaConsensus | StorePartition::SingleConsensus
        )
    }
}

/// One key/value change. `None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub partition: StorePartition,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl StoreWrite {
    /// Write `value` under `key`.
    pub fn put(partition: StorePartition, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Delete `key`.
    pub fn delete(partition: StorePartition, key: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            key: key.into(),
            value: None,
        }
    }
}

/// Immutable view of all partitions at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedState {
    state: OrdMap<Vec<u8>, Vec<u8>>,
    meta_consensus: OrdMap<Vec<u8>, Vec<u8>>,
    single_consensus: OrdMap<Vec<u8>, Vec<u8>>,
}

impl CommittedState {
    fn partition(&self, partition: StorePartition) -> &OrdMap<Vec<u8>, Vec<u8>> {
        match partition {
            StorePartition::State => &self.state,
            StorePartition::MetaConsensus => &self.meta_consensus,
            StorePartition::SingleConsensus => &self.single_consensus,
        }
    }

    fn partition_mut(&mut self, partition: StorePartition) -> &mut OrdMap<Vec<u8>, Vec<u8>> {
        match partition {
            StorePartition::State => &mut self.state,
            StorePartition::MetaConsensus => &mut self.meta_consensus,
            StorePartition::SingleConsensus => &mut self.single_consensus,
        }
    }

    /// Read a key.
    pub fn get(&self, partition: StorePartition, key: &[u8]) -> Option<&Vec<u8>> {
        self.partition(partition).get(key)
    }

    /// Number of keys in a partition.
    pub fn len(&self, partition: StorePartition) -> usize {
        self.partition(partition).len()
    }

    /// Apply one write.
    pub fn apply(&mut self, write: StoreWrite) {
        let map = self.partition_mut(write.partition);
        match write.value {
            Some(value) => {
                map.insert(write.key, value);
            }
            None => {
                map.remove(&write.key);
            }
        }
    }

    /// Hash over every partition's contents, in key order.
    pub fn root(&self) -> Hash {
        let mut parts: Vec<&[u8]> = Vec::new();
        for partition in StorePartition::ALL {
            parts.push(partition_tag(partition));
            for (key, value) in self.partition(partition).iter() {
                parts.push(key);
                parts.push(value);
            }
        }
        Hash::from_parts(&parts)
    }
}

fn partition_tag(partition: StorePartition) -> &'static [u8] {
    match partition {
        StorePartition::State => b"state",
        StorePartition::MetaConsensus => b"meta_consensus",
        StorePartition::SingleConsensus => b"single_consensus",
    }
}

/// A committed block: its header, commit info and the state it produced.
#[derive(Debug, Clone)]
struct CommittedBlock {
    header: BlockHeader,
    info: CommitInfo,
    state: CommittedState,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// State at the tip, including out-of-band commits.
    current: CommittedState,
    tip: BlockHeight,
    blocks: BTreeMap<u64, CommittedBlock>,
}

/// Durable state of one chain instance.
#[derive(Debug)]
pub struct CommitStore {
    chain_id: ChainId,
    inner: RwLock<StoreInner>,
}

impl CommitStore {
    /// Empty store at genesis.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Latest committed height.
    pub fn tip(&self) -> BlockHeight {
        self.inner.read().tip
    }

    /// Commit info recorded for `height`.
    pub fn commit_info(&self, height: u64) -> Option<CommitInfo> {
        self.inner.read().blocks.get(&height).map(|b| b.info.clone())
    }

    /// Header recorded for `height`.
    pub fn header(&self, height: u64) -> Option<BlockHeader> {
        self.inner.read().blocks.get(&height).map(|b| b.header.clone())
    }

    /// App hash of the latest commit, or zero at genesis.
    pub fn last_commit_hash(&self) -> Hash {
        let inner = self.inner.read();
        inner
            .blocks
            .get(&inner.tip.0)
            .map(|b| b.info.app_hash)
            .unwrap_or(Hash::ZERO)
    }

    /// Snapshot of the state at `height`. The tip resolves to the current
    /// state, which includes out-of-band commits made since the block.
    pub fn state_at(&self, height: u64) -> Option<CommittedState> {
        let inner = self.inner.read();
        if height == inner.tip.0 {
            return Some(inner.current.clone());
        }
        inner.blocks.get(&height).map(|b| b.state.clone())
    }

    /// Apply writes to the current state without advancing the tip.
    pub fn apply(&self, writes: impl IntoIterator<Item = StoreWrite>) -> usize {
        let mut inner = self.inner.write();
        let mut applied = 0;
        for write in writes {
            inner.current.apply(write);
            applied += 1;
        }
        applied
    }

    /// Commit a new block: apply `writes`, advance the tip and record the
    /// header and commit info.
    pub fn commit_block(
        &self,
        writes: impl IntoIterator<Item = StoreWrite>,
        timestamp_ms: u64,
    ) -> BlockHeader {
        let mut inner = self.inner.write();
        for write in writes {
            inner.current.apply(write);
        }
        let height = inner.tip.next();
        let app_hash = inner.current.root();
        let header = BlockHeader {
            chain_id: self.chain_id.clone(),
            height: height.as_i64(),
            timestamp_ms,
            app_hash,
            proposer: MOCK_PROPOSER.to_string(),
        };
        let block = CommittedBlock {
            header: header.clone(),
            info: CommitInfo {
                height: height.0,
                timestamp_ms,
                app_hash,
            },
            state: inner.current.clone(),
        };
        inner.blocks.insert(height.0, block);
        inner.tip = height;
        debug!(chain_id = %self.chain_id, height = height.0, "Block committed");
        header
    }
}

/// Handle to one chain state machine hosted by the node.
///
/// Cheap to clone; all clones share the same store.
#[derive(Debug, Clone)]
pub struct ChainInstance {
    id: ChainId,
    store: Arc<CommitStore>,
}

impl ChainInstance {
    /// Create a chain instance at genesis.
    pub fn new(id: impl Into<ChainId>) -> Self {
        let id = id.into();
        Self {
            store: Arc::new(CommitStore::new(id.clone())),
            id,
        }
    }

    /// Chain id.
    pub fn id(&self) -> &ChainId {
        &self.id
    }

    /// Committed state.
    pub fn store(&self) -> &CommitStore {
        &self.store
    }

    /// Latest committed height.
    pub fn tip(&self) -> BlockHeight {
        self.store.tip()
    }
}
