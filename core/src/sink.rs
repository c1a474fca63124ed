use std::sync::Arc;
use std::time::Duration;

use tvm_indexer_util::metrics::HistogramGuard;

use crate::chain::{Parser, Repository};
use crate::error::FatalError;
use crate::fetcher::ProcessedMaster;
use crate::linker::MessageLinker;
use crate::mapper;
use crate::models::{AccountState, Block, Message, Transaction};

#[derive(Debug, Clone)]
pub struct BatchSinkConfig {
    /// Number of master blocks committed at once.
    pub batch_masters: usize,
    /// Number of retries of a failed commit.
    pub commit_retries: usize,
    pub commit_retry_interval: Duration,
}

/// Accumulates processed master blocks and commits them in batches.
///
/// Master blocks must be handled in strictly increasing seqno order.
pub struct BatchSink {
    repo: Arc<dyn Repository>,
    parser: Arc<dyn Parser>,
    linker: MessageLinker,
    config: BatchSinkConfig,
    batch: Batch,
    last_seqno: Option<u32>,
}

#[derive(Default)]
struct Batch {
    masters: Vec<u32>,
    blocks: Vec<Block>,
    accounts: Vec<AccountState>,
    messages: Vec<Message>,
    transactions: Vec<Transaction>,
}

impl BatchSink {
    /// `last_committed` is the seqno of the last committed master block.
    pub fn new(
        repo: Arc<dyn Repository>,
        parser: Arc<dyn Parser>,
        linker: MessageLinker,
        config: BatchSinkConfig,
        last_committed: Option<u32>,
    ) -> Self {
        Self {
            repo,
            parser,
            linker,
            config,
            batch: Batch::default(),
            last_seqno: last_committed,
        }
    }

    /// Number of master blocks waiting for commit.
    pub fn pending_masters(&self) -> usize {
        self.batch.masters.len()
    }

    pub async fn handle_master(&mut self, mut processed: ProcessedMaster) -> anyhow::Result<()> {
        let seqno = processed.seqno;
        if let Some(last) = self.last_seqno {
            let expected = last.saturating_add(1);
            if seqno != expected {
                return Err(FatalError::OutOfOrder { seqno, expected }.into());
            }
        }

        let mut messages = self.linker.handle_master(&mut processed).await?;
        for msg in &mut messages {
            mapper::parse_message_payload(self.parser.as_ref(), msg).await?;
        }

        let batch = &mut self.batch;
        for mut data in std::iter::once(processed.master).chain(processed.shards) {
            batch.transactions.append(&mut data.block.transactions);
            batch.blocks.push(data.block);
            batch.accounts.append(&mut data.accounts);
        }
        batch.messages.append(&mut messages);
        batch.masters.push(seqno);
        self.last_seqno = Some(seqno);

        if self.batch.masters.len() >= self.config.batch_masters
            && self.linker.unresolved_len() == 0
        {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commits everything accumulated so far as a single transaction.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        let Some(&last_master) = self.batch.masters.last() else {
            return Ok(());
        };
        let first_master = self.batch.masters[0];

        let histogram = HistogramGuard::begin("indexer_commit_time");

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_commit().await {
                Ok(()) => break,
                Err(e) if attempts <= self.config.commit_retries => {
                    metrics::counter!("indexer_commit_errors").increment(1);
                    tracing::warn!(
                        first_master,
                        last_master,
                        attempts,
                        "failed to commit batch: {e:?}"
                    );
                    tokio::time::sleep(self.config.commit_retry_interval).await;
                }
                Err(source) => {
                    metrics::counter!("indexer_commit_errors").increment(1);
                    return Err(FatalError::CommitFailed {
                        master_seqno: last_master,
                        attempts,
                        source,
                    }
                    .into());
                }
            }
        }

        let batch = std::mem::take(&mut self.batch);
        let elapsed = histogram.finish();

        metrics::counter!("indexer_committed_masters").increment(batch.masters.len() as u64);
        metrics::counter!("indexer_committed_transactions")
            .increment(batch.transactions.len() as u64);
        metrics::counter!("indexer_committed_messages").increment(batch.messages.len() as u64);
        metrics::gauge!("indexer_committed_master_seqno").set(last_master as f64);

        tracing::info!(
            first_master,
            last_master,
            blocks = batch.blocks.len(),
            transactions = batch.transactions.len(),
            messages = batch.messages.len(),
            accounts = batch.accounts.len(),
            elapsed = %humantime::format_duration(elapsed),
            "committed batch",
        );

        self.linker.prune(last_master);
        Ok(())
    }

    async fn try_commit(&self) -> anyhow::Result<()> {
        let batch = &self.batch;

        let mut tx = self.repo.begin().await?;
        tx.add_blocks(&batch.blocks).await?;
        tx.add_account_states(&batch.accounts).await?;
        tx.add_messages(&batch.messages).await?;
        tx.add_transactions(&batch.transactions).await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use tycho_types::models::ShardIdent;

    use super::*;
    use crate::cache::CachesConfig;
    use crate::fetcher::Fetcher;
    use crate::linker::LinkerConfig;
    use crate::testing::{
        LT_PER_BLOCK, MemoryRepository, TestChain, TestParser, internal_message, std_addr,
        transaction, with_op,
    };

    struct Env {
        fetcher: Fetcher,
        repo: MemoryRepository,
        sink: BatchSink,
    }

    fn env(chain: Arc<TestChain>, parser: Arc<TestParser>, batch_masters: usize) -> Env {
        let repo = MemoryRepository::default();
        let linker = MessageLinker::new(Arc::new(repo.clone()), LinkerConfig::default(), None);
        let sink = BatchSink::new(
            Arc::new(repo.clone()),
            parser.clone(),
            linker,
            BatchSinkConfig {
                batch_masters,
                commit_retries: 2,
                commit_retry_interval: Duration::from_secs(1),
            },
            None,
        );
        Env {
            fetcher: Fetcher::new(chain, parser, &CachesConfig::default(), 4),
            repo,
            sink,
        }
    }

    fn chain_with_message() -> Arc<TestChain> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let msg = with_op(internal_message(7, &a, &b, 2 * LT_PER_BLOCK + 2), 0x0f8a7ea5);

        let chain = Arc::new(TestChain::default());
        chain.add_simple_master(0, Vec::new(), Vec::new());
        chain.add_simple_master(1, Vec::new(), Vec::new());
        chain.add_simple_master(2, Vec::new(), vec![transaction(
            &a,
            2 * LT_PER_BLOCK + 1,
            None,
            vec![msg.clone()],
        )]);
        chain.add_simple_master(3, Vec::new(), Vec::new());
        chain.add_simple_master(4, Vec::new(), vec![transaction(
            &b,
            4 * LT_PER_BLOCK + 1,
            Some(msg),
            vec![],
        )]);
        chain
    }

    #[tokio::test]
    async fn commits_resolved_messages_only() -> anyhow::Result<()> {
        let parser = Arc::new(TestParser::default());
        parser.set_operation(0x0f8a7ea5, "transfer");
        let Env {
            fetcher,
            repo,
            mut sink,
        } = env(chain_with_message(), parser, 2);

        for seqno in 1..=4 {
            sink.handle_master(fetcher.fetch_master(seqno).await?).await?;
            if seqno == 2 {
                // Source side is committed without the message itself
                assert_eq!(repo.commits(), vec![vec![1, 2]]);
                assert!(repo.messages().is_empty());
                assert_eq!(repo.transactions().len(), 1);
            }
        }

        assert_eq!(repo.commits(), vec![vec![1, 2], vec![3, 4]]);
        let messages = repo.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_resolved());
        assert_eq!(messages[0].src_tx.unwrap().master_seqno, 2);
        assert_eq!(messages[0].dst_tx.unwrap().master_seqno, 4);
        assert_eq!(messages[0].operation_name.as_deref(), Some("transfer"));

        let blocks = repo.blocks();
        assert_eq!(blocks.len(), 8);
        assert!(blocks.iter().all(|b| b.transactions.is_empty()));
        assert!(
            blocks
                .iter()
                .filter(|b| b.id.shard == ShardIdent::BASECHAIN)
                .all(|b| b.master_id.map(|m| m.seqno) == Some(b.id.seqno))
        );
        Ok(())
    }

    #[tokio::test]
    async fn records_payload_errors() -> anyhow::Result<()> {
        let Env {
            fetcher,
            repo,
            mut sink,
        } = env(chain_with_message(), Arc::new(TestParser::default()), 1);

        for seqno in 1..=4 {
            sink.handle_master(fetcher.fetch_master(seqno).await?).await?;
        }

        let messages = repo.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].error.as_deref().unwrap().contains("unknown operation"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_gaps() -> anyhow::Result<()> {
        let Env {
            fetcher, mut sink, ..
        } = env(chain_with_message(), Arc::new(TestParser::default()), 10);

        sink.handle_master(fetcher.fetch_master(1).await?).await?;
        let err = sink
            .handle_master(fetcher.fetch_master(3).await?)
            .await
            .unwrap_err()
            .downcast::<FatalError>()?;
        assert!(matches!(err, FatalError::OutOfOrder {
            seqno: 3,
            expected: 2
        }));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_commits() -> anyhow::Result<()> {
        let Env {
            fetcher,
            repo,
            mut sink,
        } = env(chain_with_message(), Arc::new(TestParser::default()), 1);

        repo.fail_commits(2);
        sink.handle_master(fetcher.fetch_master(1).await?).await?;
        assert_eq!(repo.commits(), vec![vec![1]]);

        repo.fail_commits(3);
        let err = sink
            .handle_master(fetcher.fetch_master(2).await?)
            .await
            .unwrap_err()
            .downcast::<FatalError>()?;
        assert!(matches!(err, FatalError::CommitFailed {
            master_seqno: 2,
            attempts: 3,
            ..
        }));
        assert_eq!(repo.commits(), vec![vec![1]]);
        assert_eq!(sink.pending_masters(), 1);
        Ok(())
    }
}
