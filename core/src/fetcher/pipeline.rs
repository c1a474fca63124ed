use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tvm_indexer_util::futures::JoinTask;

use super::{Fetcher, ProcessedMaster};

#[derive(Debug, Clone)]
pub struct MasterFetchPipelineConfig {
    /// Number of master blocks fetched in parallel.
    pub workers: NonZeroUsize,
    /// Delay between attempts to fetch the same master block.
    pub retry_interval: Duration,
}

/// Fetches windows of consecutive master blocks in parallel and publishes
/// them strictly in increasing seqno order.
pub struct MasterFetchPipeline {
    fetcher: Arc<Fetcher>,
    config: MasterFetchPipelineConfig,
    cancel: CancellationToken,
}

impl MasterFetchPipeline {
    pub fn new(
        fetcher: Arc<Fetcher>,
        config: MasterFetchPipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            config,
            cancel,
        }
    }

    /// Runs until the pipeline is cancelled or the output is closed.
    ///
    /// A window of `workers` heights is spawned at once. Completed heights
    /// are published as soon as all of their predecessors are, the next
    /// window starts when the whole window has been published.
    pub async fn run(self, from: u32, output: mpsc::Sender<ProcessedMaster>) {
        let workers = self.config.workers.get() as u32;
        let mut next = from;

        tracing::info!(from, workers, "started master fetch pipeline");

        loop {
            let window_start = next;
            let window_end = next.saturating_add(workers);
            tracing::debug!(window_start, window_end, "fetching window");

            let mut tasks = (window_start..window_end)
                .map(|seqno| {
                    let fetcher = self.fetcher.clone();
                    let cancel = self.cancel.clone();
                    let retry_interval = self.config.retry_interval;
                    JoinTask::new(async move {
                        let res = fetch_with_retry(&fetcher, seqno, retry_interval, &cancel).await;
                        (seqno, res)
                    })
                })
                .collect::<FuturesUnordered<_>>();

            let mut completed = BTreeMap::new();
            while let Some((seqno, res)) = tasks.next().await {
                let Some(processed) = res else {
                    tracing::info!(seqno, "master fetch pipeline cancelled");
                    return;
                };
                completed.insert(seqno, processed);

                while let Some(entry) = completed.first_entry() {
                    if *entry.key() != next {
                        break;
                    }

                    let processed = entry.remove();
                    tokio::select! {
                        res = output.send(processed) => {
                            if res.is_err() {
                                tracing::debug!(seqno = next, "master fetch pipeline output closed");
                                return;
                            }
                        }
                        _ = self.cancel.cancelled() => return,
                    }

                    metrics::gauge!("indexer_fetched_master_seqno").set(next as f64);
                    next += 1;
                }
            }

            if next == u32::MAX {
                tracing::warn!("reached the end of the masterchain seqno range");
                return;
            }
        }
    }
}

async fn fetch_with_retry(
    fetcher: &Fetcher,
    seqno: u32,
    retry_interval: Duration,
    cancel: &CancellationToken,
) -> Option<ProcessedMaster> {
    let mut attempt = 0usize;
    loop {
        let res = tokio::select! {
            res = fetcher.fetch_master(seqno) => res,
            _ = cancel.cancelled() => return None,
        };

        match res {
            Ok(processed) => return Some(processed),
            Err(e) if e.is_retryable() => {
                tracing::trace!(seqno, attempt, "master block is not ready yet: {e}");
            }
            Err(e) => {
                metrics::counter!("indexer_fetch_errors").increment(1);
                tracing::warn!(seqno, attempt, "failed to fetch master block: {e:?}");
            }
        }
        attempt += 1;

        tokio::select! {
            _ = tokio::time::sleep(retry_interval) => {}
            _ = cancel.cancelled() => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachesConfig;
    use crate::testing::{TestChain, TestParser, master_id};

    fn pipeline(chain: Arc<TestChain>, workers: usize, cancel: CancellationToken) -> MasterFetchPipeline {
        let fetcher = Fetcher::new(chain, Arc::new(TestParser::default()), &CachesConfig::default(), 4);
        MasterFetchPipeline::new(
            Arc::new(fetcher),
            MasterFetchPipelineConfig {
                workers: NonZeroUsize::new(workers).unwrap(),
                retry_interval: Duration::from_millis(100),
            },
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_in_order() -> anyhow::Result<()> {
        let chain = Arc::new(TestChain::default());
        for seqno in 99..=105 {
            chain.add_simple_master(seqno, Vec::new(), Vec::new());
        }
        // 101 completes before 100
        chain.delay_block(master_id(100), Duration::from_secs(2));
        chain.fail_master(103, 5);

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let task = JoinTask::new(pipeline(chain, 2, cancel.clone()).run(100, tx));

        let mut seqnos = Vec::new();
        for _ in 100..=105 {
            let processed = rx.recv().await.unwrap();
            seqnos.push(processed.seqno);
        }
        assert_eq!(seqnos, vec![100, 101, 102, 103, 104, 105]);

        cancel.cancel();
        task.await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_new_blocks() -> anyhow::Result<()> {
        let chain = Arc::new(TestChain::default());
        chain.add_simple_master(0, Vec::new(), Vec::new());
        chain.add_simple_master(1, Vec::new(), Vec::new());

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);
        let task = JoinTask::new(pipeline(chain.clone(), 3, cancel.clone()).run(1, tx));

        assert_eq!(rx.recv().await.unwrap().seqno, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        chain.add_simple_master(2, Vec::new(), Vec::new());
        assert_eq!(rx.recv().await.unwrap().seqno, 2);

        cancel.cancel();
        task.await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_output_is_closed() {
        let chain = Arc::new(TestChain::default());
        for seqno in 0..=4 {
            chain.add_simple_master(seqno, Vec::new(), Vec::new());
        }

        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        pipeline(chain, 2, CancellationToken::new()).run(1, tx).await;
    }
}
