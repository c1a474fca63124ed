use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tvm_indexer_util::futures::JoinTask;

use crate::chain::{ChainClient, Parser, Repository};
use crate::config::IndexerConfig;
use crate::error::FatalError;
use crate::fetcher::{Fetcher, MasterFetchPipeline};
use crate::linker::MessageLinker;
use crate::rescan::RescanScheduler;
use crate::sink::BatchSink;

/// Forward indexing pipeline and rescan loop sharing one lifecycle.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        client: Arc<dyn ChainClient>,
        parser: Arc<dyn Parser>,
        repo: Arc<dyn Repository>,
    ) -> Self {
        let fetcher = Arc::new(Fetcher::new(
            client,
            parser.clone(),
            &config.caches,
            config.transactions_concurrency,
        ));

        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                parser,
                repo,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Spawns the supervised pipeline and (if enabled) the rescan loop.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.tracker.is_closed() {
            tracing::warn!("indexer is already stopped");
            return;
        }

        inner.tracker.spawn({
            let inner = inner.clone();
            async move { inner.supervise().await }
        });

        let rescan = &inner.config.rescan;
        if rescan.enabled {
            let scheduler = RescanScheduler::new(
                inner.repo.clone(),
                inner.parser.clone(),
                rescan,
                inner.config.rescan_batch_masters(),
            );
            inner
                .tracker
                .spawn(scheduler.run(rescan.poll_interval, inner.cancel.clone()));
        }

        tracing::info!(
            workers = inner.config.workers.get(),
            rescan = rescan.enabled,
            "indexer started"
        );
    }

    /// Signals every loop to stop and waits until all of them exit.
    pub async fn stop(&self) {
        let inner = &self.inner;

        inner.cancel.cancel();
        inner.tracker.close();
        inner.tracker.wait().await;

        tracing::info!("indexer stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled() && !self.inner.tracker.is_empty()
    }
}

struct Inner {
    config: IndexerConfig,
    fetcher: Arc<Fetcher>,
    parser: Arc<dyn Parser>,
    repo: Arc<dyn Repository>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Inner {
    async fn supervise(&self) {
        loop {
            match self.run_pipeline().await {
                Ok(()) => break,
                Err(e) => {
                    metrics::counter!("indexer_pipeline_restarts").increment(1);
                    match e.downcast_ref::<FatalError>() {
                        Some(fatal) => tracing::error!(
                            master_seqno = fatal.master_seqno(),
                            "indexing pipeline failed: {e:?}"
                        ),
                        None => tracing::error!("indexing pipeline failed: {e:?}"),
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.restart_delay) => {
                    tracing::info!("restarting indexing pipeline");
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// Runs the pipeline from the next uncommitted master block until it is
    /// cancelled or fails.
    async fn run_pipeline(&self) -> anyhow::Result<()> {
        let last_committed = self
            .repo
            .get_last_master_block()
            .await?
            .map(|block| block.id.seqno);

        let from = match (last_committed, self.config.from_master) {
            (Some(seqno), _) => seqno.saturating_add(1),
            (None, Some(seqno)) => seqno,
            (None, None) => self.fetcher.client().get_last_master_seqno().await?,
        };

        let history_start_lt = self
            .repo
            .get_first_master_block()
            .await?
            .map(|block| block.start_lt);

        let linker = MessageLinker::new(
            self.repo.clone(),
            self.config.linker.clone(),
            history_start_lt,
        );
        let mut sink = BatchSink::new(
            self.repo.clone(),
            self.parser.clone(),
            linker,
            self.config.batch_sink(),
            last_committed,
        );

        tracing::info!(from, ?last_committed, "starting indexing pipeline");

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = self.cancel.child_token();
        let _producer = JoinTask::new({
            let pipeline = MasterFetchPipeline::new(
                self.fetcher.clone(),
                self.config.fetch_pipeline(),
                cancel.clone(),
            );
            pipeline.run(from, tx)
        });
        let _guard = cancel.drop_guard();

        loop {
            tokio::select! {
                processed = rx.recv() => match processed {
                    Some(processed) => sink.handle_master(processed).await?,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        sink.flush().await
    }
}
