use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tvm_indexer_util::serde_helpers;

use crate::cache::CachesConfig;
use crate::fetcher::MasterFetchPipelineConfig;
use crate::linker::LinkerConfig;
use crate::rescan::RescanConfig;
use crate::sink::BatchSinkConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Number of master blocks fetched in parallel.
    ///
    /// Default: 4.
    pub workers: NonZeroUsize,

    /// Number of master blocks committed as a single batch.
    ///
    /// Default: 10.
    pub batch_masters: usize,

    /// Number of fetched master blocks buffered between the fetcher and
    /// the sink.
    ///
    /// Default: 32.
    pub channel_capacity: usize,

    /// Delay between attempts to fetch a master block which is not
    /// available yet.
    ///
    /// Default: 100 ms.
    #[serde(with = "serde_helpers::humantime")]
    pub retry_interval: Duration,

    /// Max number of concurrent transaction and account requests per block.
    ///
    /// Default: 16.
    pub transactions_concurrency: usize,

    /// Delay before the pipeline is restarted after a fatal error.
    ///
    /// Default: 5 seconds.
    #[serde(with = "serde_helpers::humantime")]
    pub restart_delay: Duration,

    /// Number of retries of a failed batch commit.
    ///
    /// Default: 5.
    pub commit_retries: usize,

    /// Delay between batch commit attempts.
    ///
    /// Default: 1 second.
    #[serde(with = "serde_helpers::humantime")]
    pub commit_retry_interval: Duration,

    /// Seqno of the first master block to index when the repository is
    /// empty.
    ///
    /// Default: `None` (the latest master block).
    pub from_master: Option<u32>,

    pub caches: CachesConfig,

    pub linker: LinkerConfig,

    pub rescan: RescanConfig,
}

const DEFAULT_WORKERS: NonZeroUsize = NonZeroUsize::new(4).unwrap();

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batch_masters: 10,
            channel_capacity: 32,
            retry_interval: Duration::from_millis(100),
            transactions_concurrency: 16,
            restart_delay: Duration::from_secs(5),
            commit_retries: 5,
            commit_retry_interval: Duration::from_secs(1),
            from_master: None,
            caches: CachesConfig::default(),
            linker: LinkerConfig::default(),
            rescan: RescanConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        serde_helpers::load_json_from_file(path)
    }

    pub fn fetch_pipeline(&self) -> MasterFetchPipelineConfig {
        MasterFetchPipelineConfig {
            workers: self.workers,
            retry_interval: self.retry_interval,
        }
    }

    pub fn batch_sink(&self) -> BatchSinkConfig {
        BatchSinkConfig {
            batch_masters: self.batch_masters.max(1),
            commit_retries: self.commit_retries,
            commit_retry_interval: self.commit_retry_interval,
        }
    }

    /// Number of master blocks processed by a single rescan step.
    pub fn rescan_batch_masters(&self) -> u32 {
        match self.rescan.batch_masters {
            Some(batch) => batch.get(),
            None => self.workers.get() as u32,
        }
    }
}
