use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tycho_types::cell::HashBytes;
use tvm_indexer_util::FastHashMap;

use crate::chain::Repository;
use crate::error::FatalError;
use crate::fetcher::ProcessedMaster;
use crate::mapper::is_system_address;
use crate::models::{Message, MessageType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Max number of outbound messages kept in memory while waiting for
    /// their destination transaction.
    ///
    /// Messages whose source is already committed are evicted first and
    /// are later recovered from the repository.
    ///
    /// Default: 65536.
    pub retained_capacity: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            retained_capacity: 65536,
        }
    }
}

/// Joins the source and destination records of internal messages.
///
/// Outbound records wait in memory for their inbound counterpart. Inbound
/// records must be resolved by the end of the master block which contains
/// them, either from memory or from already committed history.
pub struct MessageLinker {
    repo: Arc<dyn Repository>,
    config: LinkerConfig,
    awaiting_source: FastHashMap<HashBytes, Message>,
    awaiting_destination: FastHashMap<HashBytes, Message>,
    history_start_lt: Option<u64>,
}

impl MessageLinker {
    /// `history_start_lt` is the start LT of the first indexed master block.
    /// Inbound messages created before it may have no known source.
    pub fn new(
        repo: Arc<dyn Repository>,
        config: LinkerConfig,
        history_start_lt: Option<u64>,
    ) -> Self {
        Self {
            repo,
            config,
            awaiting_source: Default::default(),
            awaiting_destination: Default::default(),
            history_start_lt,
        }
    }

    /// Number of inbound messages without a known source.
    pub fn unresolved_len(&self) -> usize {
        self.awaiting_source.len()
    }

    /// Number of outbound messages waiting for their destination.
    pub fn retained_len(&self) -> usize {
        self.awaiting_destination.len()
    }

    /// Takes messages out of every transaction of the master block and
    /// returns the ones which can be committed.
    pub async fn handle_master(
        &mut self,
        processed: &mut ProcessedMaster,
    ) -> anyhow::Result<Vec<Message>> {
        let seqno = processed.seqno;

        if self.history_start_lt.is_none() {
            let start_lt = processed.master.block.start_lt;
            tracing::info!(seqno, start_lt, "message history starts here");
            self.history_start_lt = Some(start_lt);
        }

        let mut ready = Vec::new();
        let blocks = std::iter::once(&mut processed.master).chain(&mut processed.shards);
        for data in blocks {
            for tx in &mut data.block.transactions {
                for msg in tx.take_messages() {
                    self.link(msg, &mut ready);
                }
            }
        }

        self.resolve_from_history(seqno, &mut ready).await?;

        metrics::gauge!("indexer_linker_retained").set(self.awaiting_destination.len() as f64);
        Ok(ready)
    }

    /// Evicts the oldest retained messages above the capacity whose source
    /// belongs to a committed master block.
    pub fn prune(&mut self, committed_master: u32) {
        let capacity = self.config.retained_capacity;
        let Some(excess) = self.awaiting_destination.len().checked_sub(capacity) else {
            return;
        };
        if excess == 0 {
            return;
        }

        let mut candidates = self
            .awaiting_destination
            .values()
            .filter(|msg| msg.master_seqno().is_some_and(|seqno| seqno <= committed_master))
            .map(|msg| (msg.created_lt, msg.hash))
            .collect::<Vec<_>>();
        candidates.sort_unstable();

        let mut evicted = 0usize;
        for (_, hash) in candidates.into_iter().take(excess) {
            self.awaiting_destination.remove(&hash);
            evicted += 1;
        }

        tracing::debug!(
            committed_master,
            evicted,
            retained = self.awaiting_destination.len(),
            "pruned retained messages"
        );
    }

    fn link(&mut self, msg: Message, ready: &mut Vec<Message>) {
        if msg.msg_type != MessageType::Internal {
            ready.push(msg);
            return;
        }

        if msg.src_tx.is_some() {
            match self.awaiting_source.remove(&msg.hash) {
                Some(mut inbound) => {
                    inbound.merge(msg);
                    ready.push(inbound);
                }
                None => {
                    self.awaiting_destination.insert(msg.hash, msg);
                }
            }
        } else {
            let mut inbound = msg;
            match self.awaiting_destination.remove(&inbound.hash) {
                Some(outbound) => {
                    inbound.merge(outbound);
                    ready.push(inbound);
                }
                None => {
                    self.awaiting_source.insert(inbound.hash, inbound);
                }
            }
        }
    }

    async fn resolve_from_history(
        &mut self,
        seqno: u32,
        ready: &mut Vec<Message>,
    ) -> anyhow::Result<()> {
        if self.awaiting_source.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.awaiting_source);
        for (hash, mut msg) in pending {
            if let Some(source) = self.repo.find_message_source(&hash).await? {
                msg.src_tx = Some(source.tx);
                if msg.src_contract.is_none() {
                    msg.src_contract = source.contract;
                }
                ready.push(msg);
                continue;
            }

            let from_system = msg.src_address.as_ref().is_some_and(is_system_address);
            let before_history = self
                .history_start_lt
                .is_some_and(|start_lt| msg.created_lt < start_lt);

            if from_system || before_history {
                metrics::counter!("indexer_messages_without_source").increment(1);
                tracing::debug!(seqno, %hash, from_system, "message source is not indexed");
                ready.push(msg);
                continue;
            }

            return Err(FatalError::UnknownMessageSource {
                master_seqno: seqno,
                hash,
                dst: msg.dst_address,
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tycho_types::models::{BlockId, ShardIdent};

    use super::*;
    use crate::chain::RawTransaction;
    use crate::fetcher::BlockData;
    use crate::mapper::map_transaction;
    use crate::models::Block;
    use crate::testing::{
        LT_PER_BLOCK, MemoryRepository, block_id, external_message, internal_message, master_id,
        std_addr, transaction,
    };

    fn processed(seqno: u32, shard_txs: Vec<RawTransaction>) -> ProcessedMaster {
        let block = |id: BlockId, txs: Vec<RawTransaction>| {
            BlockData {
                block: Block {
                    id,
                    master_id: None,
                    gen_utime: 0,
                    start_lt: id.seqno as u64 * LT_PER_BLOCK,
                    end_lt: (id.seqno as u64 + 1) * LT_PER_BLOCK - 1,
                    scanned_at: 0,
                    transactions: txs
                        .into_iter()
                        .map(|raw| map_transaction(raw, &id, seqno))
                        .collect(),
                },
                accounts: Vec::new(),
            }
        };

        ProcessedMaster {
            seqno,
            master: block(master_id(seqno), Vec::new()),
            shards: vec![block(block_id(ShardIdent::BASECHAIN, seqno), shard_txs)],
        }
    }

    fn linker(repo: MemoryRepository) -> MessageLinker {
        MessageLinker::new(Arc::new(repo), LinkerConfig::default(), None)
    }

    #[tokio::test]
    async fn links_across_master_blocks() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let msg = internal_message(7, &a, &b, 50 * LT_PER_BLOCK + 11);

        let mut linker = linker(MemoryRepository::default());

        let mut first = processed(50, vec![transaction(&a, 50 * LT_PER_BLOCK + 10, None, vec![
            msg.clone(),
        ])]);
        assert!(linker.handle_master(&mut first).await?.is_empty());
        assert_eq!(linker.retained_len(), 1);

        for seqno in 51..53 {
            assert!(linker.handle_master(&mut processed(seqno, Vec::new())).await?.is_empty());
        }

        let mut last = processed(53, vec![transaction(&b, 53 * LT_PER_BLOCK + 5, Some(msg), vec![])]);
        let ready = linker.handle_master(&mut last).await?;
        assert_eq!(ready.len(), 1);

        let msg = &ready[0];
        assert!(msg.is_resolved());
        assert_eq!(msg.src_tx.unwrap().master_seqno, 50);
        assert_eq!(msg.dst_tx.unwrap().master_seqno, 53);
        assert_eq!(linker.retained_len(), 0);
        assert_eq!(linker.unresolved_len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn links_within_one_master_in_any_order() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let msg = internal_message(7, &a, &b, 10 * LT_PER_BLOCK + 11);

        let mut linker = linker(MemoryRepository::default());
        // Destination transaction goes first
        let mut master = processed(10, vec![
            transaction(&b, 10 * LT_PER_BLOCK + 20, Some(msg.clone()), vec![]),
            transaction(&a, 10 * LT_PER_BLOCK + 10, None, vec![msg]),
        ]);

        let ready = linker.handle_master(&mut master).await?;
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_resolved());
        Ok(())
    }

    #[tokio::test]
    async fn external_messages_are_ready_immediately() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let mut linker = linker(MemoryRepository::default());

        let mut master = processed(10, vec![transaction(
            &a,
            10 * LT_PER_BLOCK + 1,
            Some(external_message(3, &a)),
            vec![],
        )]);
        let ready = linker.handle_master(&mut master).await?;
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_resolved());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_source_is_fatal() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let mut linker = linker(MemoryRepository::default());

        linker.handle_master(&mut processed(10, Vec::new())).await?;

        let msg = internal_message(9, &a, &b, 11 * LT_PER_BLOCK + 1);
        let mut master = processed(12, vec![transaction(&b, 12 * LT_PER_BLOCK + 1, Some(msg), vec![])]);
        let err = linker.handle_master(&mut master).await.unwrap_err();

        let err = err.downcast::<FatalError>()?;
        assert!(matches!(err, FatalError::UnknownMessageSource { master_seqno: 12, .. }));
        assert_eq!(err.master_seqno(), 12);
        Ok(())
    }

    #[tokio::test]
    async fn exempts_system_and_pre_history_sources() -> anyhow::Result<()> {
        let elector = std_addr(-1, 0x33);
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let mut linker = linker(MemoryRepository::default());

        let from_elector = internal_message(1, &elector, &b, 10 * LT_PER_BLOCK + 1);
        let before_history = internal_message(2, &a, &b, 9 * LT_PER_BLOCK);
        let mut master = processed(10, vec![
            transaction(&b, 10 * LT_PER_BLOCK + 5, Some(from_elector), vec![]),
            transaction(&b, 10 * LT_PER_BLOCK + 6, Some(before_history), vec![]),
        ]);

        let ready = linker.handle_master(&mut master).await?;
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(|m| m.src_tx.is_none() && m.dst_tx.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn history_starts_at_first_master_block() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let master_start_lt = 11 * LT_PER_BLOCK;

        // The shard block starts long before its master block
        let first_master = |created_lt: u64| {
            let msg = internal_message(9, &a, &b, created_lt);
            let mut master = processed(11, vec![transaction(&b, master_start_lt + 5, Some(msg), vec![])]);
            master.shards[0].block.start_lt = 10 * LT_PER_BLOCK;
            master
        };

        let before_master = 10 * LT_PER_BLOCK + 500;
        for history_start_lt in [None, Some(master_start_lt)] {
            let mut linker = MessageLinker::new(
                Arc::new(MemoryRepository::default()),
                LinkerConfig::default(),
                history_start_lt,
            );
            let ready = linker.handle_master(&mut first_master(before_master)).await?;
            assert_eq!(ready.len(), 1);
            assert!(ready[0].src_tx.is_none());
        }

        let mut linker = linker(MemoryRepository::default());
        let err = linker
            .handle_master(&mut first_master(master_start_lt + 1))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<FatalError>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn prune_keeps_uncommitted_sources() -> anyhow::Result<()> {
        let a = std_addr(0, 1);
        let b = std_addr(0, 2);
        let mut linker = MessageLinker::new(
            Arc::new(MemoryRepository::default()),
            LinkerConfig {
                retained_capacity: 1,
            },
            None,
        );

        for seqno in 10..13u32 {
            let lt = seqno as u64 * LT_PER_BLOCK + 1;
            let msg = internal_message(seqno as u8, &a, &b, lt + 1);
            let mut master = processed(seqno, vec![transaction(&a, lt, None, vec![msg])]);
            linker.handle_master(&mut master).await?;
        }
        assert_eq!(linker.retained_len(), 3);

        // Only the source at 10 is committed
        linker.prune(10);
        assert_eq!(linker.retained_len(), 2);

        linker.prune(12);
        assert_eq!(linker.retained_len(), 1);
        assert!(linker.awaiting_destination.contains_key(&HashBytes([12; 32])));
        Ok(())
    }
}
