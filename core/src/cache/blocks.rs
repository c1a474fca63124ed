use std::sync::Arc;
use std::time::Duration;

use tycho_types::models::BlockId;
use tvm_indexer_util::FastHasherState;

/// Masterchain seqno to full block id.
pub struct MasterBlockCache {
    inner: moka::sync::Cache<u32, BlockId, FastHasherState>,
}

impl MasterBlockCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: moka::sync::Cache::builder()
                .time_to_idle(ttl)
                .build_with_hasher(Default::default()),
        }
    }

    pub fn get(&self, seqno: u32) -> Option<BlockId> {
        self.inner.get(&seqno)
    }

    pub fn set(&self, block_id: BlockId) {
        self.inner.insert(block_id.seqno, block_id);
    }
}

/// Masterchain block id to the top shard blocks it references.
pub struct ShardsCache {
    inner: moka::sync::Cache<BlockId, Arc<[BlockId]>, FastHasherState>,
}

impl ShardsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: moka::sync::Cache::builder()
                .time_to_idle(ttl)
                .build_with_hasher(Default::default()),
        }
    }

    pub fn get(&self, master: &BlockId) -> Option<Arc<[BlockId]>> {
        self.inner.get(master)
    }

    pub fn set(&self, master: BlockId, shards: Arc<[BlockId]>) {
        self.inner.insert(master, shards);
    }
}
