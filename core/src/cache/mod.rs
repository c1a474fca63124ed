use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tvm_indexer_util::serde_helpers;

pub use self::accounts::AccountStateCache;
pub use self::blocks::{MasterBlockCache, ShardsCache};
pub use self::libraries::LibraryCache;

mod accounts;
mod blocks;
mod libraries;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
    /// Idle time after which a cached master block id is dropped.
    ///
    /// Default: 1 second.
    #[serde(with = "serde_helpers::humantime")]
    pub master_blocks_ttl: Duration,

    /// Idle time after which a cached shards list is dropped.
    ///
    /// Default: 1 second.
    #[serde(with = "serde_helpers::humantime")]
    pub shards_ttl: Duration,

    /// Max number of cached per-block account states.
    ///
    /// Default: 16384.
    pub accounts_capacity: NonZeroUsize,

    /// Max number of cached library cells.
    ///
    /// Default: 16384.
    pub libraries_capacity: NonZeroUsize,
}

const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(16384).unwrap();

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            master_blocks_ttl: Duration::from_secs(1),
            shards_ttl: Duration::from_secs(1),
            accounts_capacity: DEFAULT_CAPACITY,
            libraries_capacity: DEFAULT_CAPACITY,
        }
    }
}
