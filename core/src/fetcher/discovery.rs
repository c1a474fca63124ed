use anyhow::anyhow;
use tycho_types::models::{BlockId, ShardIdent};
use tvm_indexer_util::{FastHashMap, FastHashSet};

use super::Fetcher;
use crate::chain::{BlockHeader, ChainResult};

/// Max number of shard blocks discovered for a single master block.
const MAX_UNSEEN_BLOCKS: usize = 1024;

/// The masterchain block with every shard block it newly finalized.
#[derive(Debug, Clone)]
pub struct UnseenBlocks {
    pub master: BlockHeader,
    /// Shard blocks sorted by seqno.
    pub shards: Vec<BlockHeader>,
}

impl Fetcher {
    /// Walks parents of the top shard blocks of the master block until the
    /// blocks referenced by the previous master block are reached.
    pub async fn unseen_blocks(&self, seqno: u32) -> ChainResult<UnseenBlocks> {
        let master_id = self.lookup_master_block(seqno).await?;
        let master = self.get_block_header(&master_id).await?;
        let top_blocks = self.get_shards_info(&master_id).await?;

        let mut last_seen = FastHashMap::<ShardIdent, u32>::default();
        if let Some(prev_seqno) = seqno.checked_sub(1) {
            let prev_id = self.lookup_master_block(prev_seqno).await?;
            for block in self.get_shards_info(&prev_id).await?.iter() {
                last_seen.insert(block.shard, block.seqno);
            }
        }

        let mut visited = FastHashSet::<BlockId>::default();
        let mut stack = top_blocks.iter().rev().copied().collect::<Vec<_>>();
        let mut shards = Vec::new();

        while let Some(block_id) = stack.pop() {
            if !visited.insert(block_id) {
                continue;
            }

            if block_id.seqno == 0
                || matches!(last_seen.get(&block_id.shard), Some(seen) if *seen >= block_id.seqno)
            {
                continue;
            }

            if shards.len() >= MAX_UNSEEN_BLOCKS {
                return Err(anyhow!(
                    "too many unseen shard blocks for master block {seqno}"
                )
                .into());
            }

            let header = self.get_block_header(&block_id).await?;
            stack.extend(header.prev_blocks.iter().copied());
            shards.push(header);
        }

        shards.sort_unstable_by_key(|header| {
            let id = &header.id;
            (id.seqno, id.shard.workchain(), id.shard.prefix())
        });

        tracing::trace!(seqno, shards = shards.len(), "found unseen shard blocks");
        Ok(UnseenBlocks { master, shards })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::CachesConfig;
    use crate::chain::ChainError;
    use crate::testing::{TestChain, TestParser, block_id, header, master_id, shard};

    fn fetcher(chain: Arc<TestChain>) -> Fetcher {
        Fetcher::new(chain, Arc::new(TestParser::default()), &CachesConfig::default(), 4)
    }

    fn add_master(chain: &TestChain, seqno: u32, shards: Vec<BlockId>) {
        let prev = master_id(seqno.saturating_sub(1));
        chain.add_master(header(master_id(seqno), vec![prev]), Vec::new(), shards);
    }

    fn ids(blocks: &UnseenBlocks) -> Vec<BlockId> {
        blocks.shards.iter().map(|h| h.id).collect()
    }

    #[tokio::test]
    async fn walks_through_split_and_merge() -> anyhow::Result<()> {
        let full = ShardIdent::BASECHAIN;
        let left = shard(0, 0x4000_0000_0000_0000);
        let right = shard(0, 0xc000_0000_0000_0000);

        let chain = Arc::new(TestChain::default());

        chain.add_block(header(block_id(full, 10), vec![block_id(full, 9)]), Vec::new());
        add_master(&chain, 1, vec![block_id(full, 10)]);

        // Split
        for child in [left, right] {
            let mut split = header(block_id(child, 11), vec![block_id(full, 10)]);
            split.after_split = true;
            chain.add_block(split, Vec::new());
        }
        add_master(&chain, 2, vec![block_id(left, 11), block_id(right, 11)]);

        // Two blocks of the left shard, none of the right one
        chain.add_block(header(block_id(left, 12), vec![block_id(left, 11)]), Vec::new());
        chain.add_block(header(block_id(left, 13), vec![block_id(left, 12)]), Vec::new());
        add_master(&chain, 3, vec![block_id(left, 13), block_id(right, 11)]);

        // Merge
        chain.add_block(
            header(block_id(full, 14), vec![block_id(left, 13), block_id(right, 11)]),
            Vec::new(),
        );
        add_master(&chain, 4, vec![block_id(full, 14)]);

        let fetcher = fetcher(chain);

        let unseen = fetcher.unseen_blocks(2).await?;
        assert_eq!(unseen.master.id, master_id(2));
        assert_eq!(ids(&unseen), vec![block_id(left, 11), block_id(right, 11)]);

        let unseen = fetcher.unseen_blocks(3).await?;
        assert_eq!(ids(&unseen), vec![block_id(left, 12), block_id(left, 13)]);

        let unseen = fetcher.unseen_blocks(4).await?;
        assert_eq!(ids(&unseen), vec![block_id(full, 14)]);

        Ok(())
    }

    #[tokio::test]
    async fn visits_shared_parent_once() -> anyhow::Result<()> {
        let full = ShardIdent::BASECHAIN;
        let left = shard(0, 0x4000_0000_0000_0000);
        let right = shard(0, 0xc000_0000_0000_0000);

        let chain = Arc::new(TestChain::default());
        chain.add_block(header(block_id(full, 10), vec![block_id(full, 9)]), Vec::new());
        add_master(&chain, 1, vec![block_id(full, 10)]);

        // The parent block is not referenced by any master block
        chain.add_block(header(block_id(full, 11), vec![block_id(full, 10)]), Vec::new());
        for child in [left, right] {
            chain.add_block(header(block_id(child, 12), vec![block_id(full, 11)]), Vec::new());
        }
        add_master(&chain, 2, vec![block_id(left, 12), block_id(right, 12)]);

        let unseen = fetcher(chain).unseen_blocks(2).await?;
        assert_eq!(ids(&unseen), vec![
            block_id(full, 11),
            block_id(left, 12),
            block_id(right, 12),
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_master_is_retryable() {
        let chain = Arc::new(TestChain::default());
        add_master(&chain, 1, Vec::new());

        let err = fetcher(chain).unseen_blocks(5).await.unwrap_err();
        assert!(matches!(err, ChainError::BlockNotFound));
        assert!(err.is_retryable());
    }
}
