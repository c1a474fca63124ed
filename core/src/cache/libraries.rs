use std::num::NonZeroUsize;

use bytes::Bytes;
use tycho_types::cell::HashBytes;
use tvm_indexer_util::FastHasherState;

/// Library cells referenced from account code.
///
/// Libraries are immutable, so only the size is bounded.
pub struct LibraryCache {
    libraries: moka::sync::Cache<HashBytes, Bytes, FastHasherState>,
}

impl LibraryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            libraries: moka::sync::Cache::builder()
                .max_capacity(capacity.get() as u64)
                .build_with_hasher(Default::default()),
        }
    }

    pub fn get(&self, hash: &HashBytes) -> Option<Bytes> {
        self.libraries.get(hash)
    }

    pub fn insert(&self, hash: HashBytes, code: Bytes) {
        self.libraries.insert(hash, code);
    }
}
