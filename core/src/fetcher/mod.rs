use std::sync::Arc;

use bytes::Bytes;
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockId, StdAddr};
use tvm_indexer_util::metrics::HistogramGuard;

pub use self::block::{BlockData, ProcessedMaster};
pub use self::discovery::UnseenBlocks;
pub use self::lookup::ChainAccountLookup;
pub use self::pipeline::{MasterFetchPipeline, MasterFetchPipelineConfig};
use crate::cache::{AccountStateCache, CachesConfig, LibraryCache, MasterBlockCache, ShardsCache};
use crate::chain::{BlockHeader, ChainClient, ChainResult, Parser};
use crate::mapper;
use crate::models::AccountState;

mod block;
mod discovery;
mod lookup;
mod pipeline;

/// Cached point-in-time reads from the chain.
///
/// The fetcher owns all chain-side caches; nothing else touches them.
pub struct Fetcher {
    client: Arc<dyn ChainClient>,
    parser: Arc<dyn Parser>,
    master_blocks: MasterBlockCache,
    shards: ShardsCache,
    accounts: AccountStateCache,
    libraries: LibraryCache,
    transactions_concurrency: usize,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        parser: Arc<dyn Parser>,
        caches: &CachesConfig,
        transactions_concurrency: usize,
    ) -> Self {
        Self {
            client,
            parser,
            master_blocks: MasterBlockCache::new(caches.master_blocks_ttl),
            shards: ShardsCache::new(caches.shards_ttl),
            accounts: AccountStateCache::new(caches.accounts_capacity),
            libraries: LibraryCache::new(caches.libraries_capacity),
            transactions_concurrency: transactions_concurrency.max(1),
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub async fn lookup_master_block(&self, seqno: u32) -> ChainResult<BlockId> {
        if let Some(block_id) = self.master_blocks.get(seqno) {
            return Ok(block_id);
        }

        let block_id = self.client.lookup_master_block(seqno).await?;
        self.master_blocks.set(block_id);
        Ok(block_id)
    }

    pub async fn get_shards_info(&self, master: &BlockId) -> ChainResult<Arc<[BlockId]>> {
        if let Some(shards) = self.shards.get(master) {
            return Ok(shards);
        }

        let shards = Arc::<[BlockId]>::from(self.client.get_shards_info(master).await?);
        self.shards.set(*master, shards.clone());
        Ok(shards)
    }

    pub async fn get_block_header(&self, block_id: &BlockId) -> ChainResult<BlockHeader> {
        self.client.get_block_header(block_id).await
    }

    /// Returns the mapped account state as of the block, with interfaces
    /// determined but contract data not parsed.
    pub async fn get_account(
        &self,
        header: &BlockHeader,
        master_seqno: u32,
        address: &StdAddr,
    ) -> ChainResult<Arc<AccountState>> {
        let block_id = &header.id;
        let block = block_id.as_short_id();
        if let Some(state) = self.accounts.get(&block, address) {
            metrics::counter!("indexer_account_cache_hits").increment(1);
            return Ok(state);
        }
        metrics::counter!("indexer_account_cache_misses").increment(1);

        let _histogram = HistogramGuard::begin("indexer_fetch_account_time");

        let mut raw = self.client.get_account(block_id, address).await?;
        if let Some(library) = raw.library_code {
            let code = self.get_library(&library).await?;
            raw.code = Some(code);
            raw.code_hash = Some(library);
        }

        let mut state = mapper::map_account(raw, block_id, master_seqno, header.gen_utime);
        if state.is_active() {
            state.types = self.parser.determine_interfaces(&state).await?;
        }

        let state = Arc::new(state);
        self.accounts.set(block, state.clone());
        Ok(state)
    }

    async fn get_library(&self, hash: &HashBytes) -> anyhow::Result<Bytes> {
        if let Some(code) = self.libraries.get(hash) {
            return Ok(code);
        }

        let libraries = self.client.get_libraries(std::slice::from_ref(hash)).await?;
        let mut found = None;
        for (library_hash, code) in libraries {
            if &library_hash == hash {
                found = Some(code.clone());
            }
            self.libraries.insert(library_hash, code);
        }

        found.ok_or_else(|| anyhow::anyhow!("library cell {hash} not found"))
    }
}
