use futures_util::{StreamExt, TryStreamExt, stream};
use tycho_types::models::{BlockId, BlockIdShort, StdAddr};
use tvm_indexer_util::metrics::HistogramGuard;
use tvm_indexer_util::{FastHashMap, FastHashSet};

use super::{ChainAccountLookup, Fetcher};
use crate::chain::{BlockHeader, ChainError, ChainResult, RawTransaction, TransactionId};
use crate::mapper;
use crate::models::{AccountState, Block, ContractName};

/// A mapped block with the states of every account it touched.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: Block,
    pub accounts: Vec<AccountState>,
}

/// Everything finalized by a single masterchain block.
#[derive(Debug, Clone)]
pub struct ProcessedMaster {
    pub seqno: u32,
    pub master: BlockData,
    pub shards: Vec<BlockData>,
}

impl ProcessedMaster {
    pub fn blocks(&self) -> impl Iterator<Item = &BlockData> {
        std::iter::once(&self.master).chain(&self.shards)
    }

    pub fn transactions_count(&self) -> usize {
        self.blocks().map(|b| b.block.transactions.len()).sum()
    }
}

impl Fetcher {
    /// Fetches and maps the master block with all of its unseen shard blocks.
    pub async fn fetch_master(&self, seqno: u32) -> ChainResult<ProcessedMaster> {
        let histogram = HistogramGuard::begin("indexer_fetch_master_time");

        let unseen = self.unseen_blocks(seqno).await?;
        let master_id = unseen.master.id.as_short_id();

        let master = self.fetch_block(&unseen.master, None, &unseen.master).await?;
        let shards = futures_util::future::try_join_all(
            unseen
                .shards
                .iter()
                .map(|header| self.fetch_block(header, Some(master_id), &unseen.master)),
        )
        .await?;

        let processed = ProcessedMaster {
            seqno,
            master,
            shards,
        };

        let elapsed = histogram.finish();
        tracing::debug!(
            seqno,
            shard_blocks = processed.shards.len(),
            transactions = processed.transactions_count(),
            elapsed = %humantime::format_duration(elapsed),
            "fetched master block",
        );
        Ok(processed)
    }

    async fn fetch_block(
        &self,
        header: &BlockHeader,
        master_id: Option<BlockIdShort>,
        master: &BlockHeader,
    ) -> ChainResult<BlockData> {
        let block_id = &header.id;
        let master_seqno = master.id.seqno;

        let ids = self.get_transaction_ids(block_id).await?;
        let workchain = block_id.shard.workchain() as i8;

        let client = self.client();
        let raw_transactions = stream::iter(ids)
            .map(|id| {
                let address = StdAddr::new(workchain, id.account);
                async move { client.get_transaction(block_id, &address, id.lt).await }
            })
            .buffered(self.transactions_concurrency)
            .try_collect::<Vec<RawTransaction>>()
            .await?;

        let mut unique = FastHashSet::default();
        let addresses = raw_transactions
            .iter()
            .map(|tx| tx.account.clone())
            .filter(|address| unique.insert(address.clone()))
            .collect::<Vec<_>>();

        let lookup = ChainAccountLookup::new(self, master);
        let accounts = stream::iter(addresses)
            .map(|address| {
                let lookup = &lookup;
                async move {
                    let state = self.get_account(header, master_seqno, &address).await?;
                    let mut state = AccountState::clone(&state);
                    mapper::parse_account_data(self.parser.as_ref(), &mut state, lookup).await?;
                    Ok::<_, ChainError>(state)
                }
            })
            .buffered(self.transactions_concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        let contracts = accounts
            .iter()
            .filter_map(|state| Some((&state.address, state.types.first()?)))
            .collect::<FastHashMap<&StdAddr, &ContractName>>();

        let transactions = raw_transactions
            .into_iter()
            .map(|raw| {
                let mut tx = mapper::map_transaction(raw, block_id, master_seqno);
                let contract = contracts.get(&tx.address).map(|c| (*c).clone());
                if let Some(msg) = &mut tx.in_msg {
                    msg.dst_contract = contract.clone();
                }
                for msg in &mut tx.out_msgs {
                    msg.src_contract = contract.clone();
                }
                tx
            })
            .collect::<Vec<_>>();

        Ok(BlockData {
            block: Block {
                id: *block_id,
                master_id,
                gen_utime: header.gen_utime,
                start_lt: header.start_lt,
                end_lt: header.end_lt,
                scanned_at: tvm_indexer_util::time::now_sec(),
                transactions,
            },
            accounts,
        })
    }

    async fn get_transaction_ids(&self, block_id: &BlockId) -> ChainResult<Vec<TransactionId>> {
        let mut ids = Vec::new();
        let mut after = None::<TransactionId>;
        loop {
            let (page, more) = self
                .client()
                .get_block_transaction_ids(block_id, after.as_ref())
                .await?;

            after = page.last().copied();
            ids.extend(page);

            if !more || after.is_none() {
                return Ok(ids);
            }
        }
    }
}
