use std::num::NonZeroUsize;
use std::sync::Arc;

use tycho_types::models::{BlockIdShort, StdAddr};
use tvm_indexer_util::FastHasherState;

use crate::models::AccountState;

/// Mapped account states as of a specific block.
pub struct AccountStateCache {
    inner: moka::sync::Cache<(BlockIdShort, StdAddr), Arc<AccountState>, FastHasherState>,
}

impl AccountStateCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: moka::sync::Cache::builder()
                .max_capacity(capacity.get() as u64)
                .build_with_hasher(Default::default()),
        }
    }

    pub fn get(&self, block: &BlockIdShort, address: &StdAddr) -> Option<Arc<AccountState>> {
        self.inner.get(&(*block, address.clone()))
    }

    pub fn set(&self, block: BlockIdShort, state: Arc<AccountState>) {
        self.inner.insert((block, state.address.clone()), state);
    }

    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
