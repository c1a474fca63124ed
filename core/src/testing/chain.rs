use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockId, ShardIdent, StdAddr};
use tvm_indexer_util::FastHashMap;

use super::{block_id, header, master_id};
use crate::chain::{
    BlockHeader, ChainClient, ChainError, ChainResult, RawAccount, RawTransaction, TransactionId,
};

const PAGE_SIZE: usize = 2;

/// A chain node backed by hand-built blocks.
#[derive(Default)]
pub struct TestChain {
    state: Mutex<ChainState>,
    account_requests: AtomicUsize,
    library_requests: AtomicUsize,
}

#[derive(Default)]
struct ChainState {
    masters: BTreeMap<u32, BlockId>,
    shards: FastHashMap<BlockId, Vec<BlockId>>,
    headers: FastHashMap<BlockId, BlockHeader>,
    transactions: FastHashMap<BlockId, Vec<RawTransaction>>,
    accounts: FastHashMap<StdAddr, RawAccount>,
    block_accounts: FastHashMap<(BlockId, StdAddr), RawAccount>,
    libraries: FastHashMap<HashBytes, Bytes>,
    delays: FastHashMap<BlockId, Duration>,
    failures: FastHashMap<u32, usize>,
}

impl TestChain {
    pub fn add_block(&self, header: BlockHeader, transactions: Vec<RawTransaction>) {
        let mut state = self.state.lock();
        state.transactions.insert(header.id, transactions);
        state.headers.insert(header.id, header);
    }

    pub fn add_master(
        &self,
        header: BlockHeader,
        transactions: Vec<RawTransaction>,
        shards: Vec<BlockId>,
    ) {
        let id = header.id;
        self.add_block(header, transactions);

        let mut state = self.state.lock();
        state.masters.insert(id.seqno, id);
        state.shards.insert(id, shards);
    }

    /// Adds a master block with a single basechain shard which produces
    /// exactly one block per master.
    pub fn add_simple_master(
        &self,
        seqno: u32,
        master_transactions: Vec<RawTransaction>,
        shard_transactions: Vec<RawTransaction>,
    ) {
        let shard_id = block_id(ShardIdent::BASECHAIN, seqno);
        let prev_shard = block_id(ShardIdent::BASECHAIN, seqno.saturating_sub(1));
        self.add_block(header(shard_id, vec![prev_shard]), shard_transactions);

        let prev_master = master_id(seqno.saturating_sub(1));
        self.add_master(
            header(master_id(seqno), vec![prev_master]),
            master_transactions,
            vec![shard_id],
        );
    }

    /// Account state returned for every block without an explicit override.
    pub fn set_account(&self, account: RawAccount) {
        self.state.lock().accounts.insert(account.address.clone(), account);
    }

    pub fn set_block_account(&self, block: BlockId, account: RawAccount) {
        self.state
            .lock()
            .block_accounts
            .insert((block, account.address.clone()), account);
    }

    pub fn add_library(&self, hash: HashBytes, code: Bytes) {
        self.state.lock().libraries.insert(hash, code);
    }

    /// Delays every header request of the block.
    pub fn delay_block(&self, block: BlockId, delay: Duration) {
        self.state.lock().delays.insert(block, delay);
    }

    /// Makes the next `times` lookups of the master block fail as not applied.
    pub fn fail_master(&self, seqno: u32, times: usize) {
        self.state.lock().failures.insert(seqno, times);
    }

    pub fn account_requests(&self) -> usize {
        self.account_requests.load(Ordering::Acquire)
    }

    pub fn library_requests(&self) -> usize {
        self.library_requests.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ChainClient for TestChain {
    async fn get_last_master_seqno(&self) -> ChainResult<u32> {
        let state = self.state.lock();
        state
            .masters
            .last_key_value()
            .map(|(seqno, _)| *seqno)
            .ok_or(ChainError::BlockNotFound)
    }

    async fn lookup_master_block(&self, seqno: u32) -> ChainResult<BlockId> {
        let mut state = self.state.lock();
        if let Some(failures) = state.failures.get_mut(&seqno) {
            if *failures > 0 {
                *failures -= 1;
                return Err(ChainError::NotApplied);
            }
        }

        state
            .masters
            .get(&seqno)
            .copied()
            .ok_or(ChainError::BlockNotFound)
    }

    async fn get_shards_info(&self, master: &BlockId) -> ChainResult<Vec<BlockId>> {
        let state = self.state.lock();
        state
            .shards
            .get(master)
            .cloned()
            .ok_or(ChainError::BlockNotFound)
    }

    async fn get_block_header(&self, block: &BlockId) -> ChainResult<BlockHeader> {
        let delay = self.state.lock().delays.get(block).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        state
            .headers
            .get(block)
            .cloned()
            .ok_or(ChainError::BlockNotFound)
    }

    async fn get_block_transaction_ids(
        &self,
        block: &BlockId,
        after: Option<&TransactionId>,
    ) -> ChainResult<(Vec<TransactionId>, bool)> {
        let state = self.state.lock();
        let transactions = state
            .transactions
            .get(block)
            .ok_or(ChainError::BlockNotFound)?;

        let ids = transactions
            .iter()
            .map(|tx| TransactionId {
                account: tx.account.address,
                lt: tx.lt,
                hash: tx.hash,
            })
            .collect::<Vec<_>>();

        let offset = match after {
            Some(after) => match ids.iter().position(|id| id == after) {
                Some(position) => position + 1,
                None => return Err(anyhow::anyhow!("unknown transaction cursor").into()),
            },
            None => 0,
        };

        let page = ids
            .iter()
            .skip(offset)
            .take(PAGE_SIZE)
            .copied()
            .collect::<Vec<_>>();
        let more = offset + page.len() < ids.len();
        Ok((page, more))
    }

    async fn get_transaction(
        &self,
        block: &BlockId,
        address: &StdAddr,
        lt: u64,
    ) -> ChainResult<RawTransaction> {
        let state = self.state.lock();
        state
            .transactions
            .get(block)
            .and_then(|txs| txs.iter().find(|tx| &tx.account == address && tx.lt == lt))
            .cloned()
            .ok_or(ChainError::BlockNotFound)
    }

    async fn get_account(&self, block: &BlockId, address: &StdAddr) -> ChainResult<RawAccount> {
        self.account_requests.fetch_add(1, Ordering::AcqRel);

        let state = self.state.lock();
        let account = state
            .block_accounts
            .get(&(*block, address.clone()))
            .or_else(|| state.accounts.get(address))
            .cloned()
            .unwrap_or_else(|| RawAccount::non_exist(address.clone()));
        Ok(account)
    }

    async fn get_libraries(&self, hashes: &[HashBytes]) -> ChainResult<Vec<(HashBytes, Bytes)>> {
        self.library_requests.fetch_add(1, Ordering::AcqRel);

        let state = self.state.lock();
        Ok(hashes
            .iter()
            .filter_map(|hash| {
                let code = state.libraries.get(hash)?;
                Some((*hash, code.clone()))
            })
            .collect())
    }
}
