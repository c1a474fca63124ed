use async_trait::async_trait;
use bytes::Bytes;
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockId, StdAddr};

use crate::models::AccountStatus;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("block not found")]
    BlockNotFound,
    #[error("block is not applied")]
    NotApplied,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChainError {
    /// Whether the request may succeed later without any intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BlockNotFound | Self::NotApplied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub id: BlockId,
    pub gen_utime: u32,
    pub start_lt: u64,
    pub end_lt: u64,
    /// One parent for a regular block or after split, two after merge.
    pub prev_blocks: Vec<BlockId>,
    pub after_split: bool,
    pub after_merge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub account: HashBytes,
    pub lt: u64,
    pub hash: HashBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessageInfo {
    Internal {
        src: StdAddr,
        dst: StdAddr,
        value: u128,
        ihr_fee: u128,
        fwd_fee: u128,
        bounce: bool,
        bounced: bool,
        created_lt: u64,
        created_at: u32,
    },
    ExternalIn {
        dst: StdAddr,
        import_fee: u128,
    },
    ExternalOut {
        src: StdAddr,
        created_lt: u64,
        created_at: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Representation hash of the message cell.
    pub hash: HashBytes,
    pub info: RawMessageInfo,
    pub body: Bytes,
    /// First 32 bits of the body, when present.
    pub op_code: Option<u32>,
    pub init_code: Option<Bytes>,
    pub init_data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: HashBytes,
    pub lt: u64,
    pub account: StdAddr,
    pub prev_tx_hash: HashBytes,
    pub prev_tx_lt: u64,
    pub now: u32,
    pub total_fees: u128,
    pub orig_status: AccountStatus,
    pub end_status: AccountStatus,
    pub aborted: bool,
    pub compute_exit_code: Option<i32>,
    pub in_msg: Option<RawMessage>,
    pub out_msgs: Vec<RawMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccount {
    pub address: StdAddr,
    pub status: AccountStatus,
    pub balance: u128,
    pub last_tx_lt: u64,
    pub last_tx_hash: HashBytes,
    pub code: Option<Bytes>,
    pub code_hash: Option<HashBytes>,
    /// Set when the code cell is a library reference to this hash.
    pub library_code: Option<HashBytes>,
    pub data: Option<Bytes>,
    pub data_hash: Option<HashBytes>,
    pub get_method_hashes: Vec<u32>,
}

impl RawAccount {
    pub fn non_exist(address: StdAddr) -> Self {
        Self {
            address,
            status: AccountStatus::NonExist,
            balance: 0,
            last_tx_lt: 0,
            last_tx_hash: HashBytes::ZERO,
            code: None,
            code_hash: None,
            library_code: None,
            data: None,
            data_hash: None,
            get_method_hashes: Vec::new(),
        }
    }
}

/// Point-in-time reads from a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Returns seqno of the latest applied masterchain block.
    async fn get_last_master_seqno(&self) -> ChainResult<u32>;

    /// Resolves a full masterchain block id by its seqno.
    async fn lookup_master_block(&self, seqno: u32) -> ChainResult<BlockId>;

    /// Returns top shard blocks referenced by the masterchain block.
    async fn get_shards_info(&self, master: &BlockId) -> ChainResult<Vec<BlockId>>;

    async fn get_block_header(&self, block: &BlockId) -> ChainResult<BlockHeader>;

    /// Returns a page of transaction ids after the cursor and whether
    /// there are more.
    async fn get_block_transaction_ids(
        &self,
        block: &BlockId,
        after: Option<&TransactionId>,
    ) -> ChainResult<(Vec<TransactionId>, bool)>;

    async fn get_transaction(
        &self,
        block: &BlockId,
        address: &StdAddr,
        lt: u64,
    ) -> ChainResult<RawTransaction>;

    /// Returns the account state as of the specified block.
    async fn get_account(&self, block: &BlockId, address: &StdAddr) -> ChainResult<RawAccount>;

    /// Returns the code of the requested library cells which are known.
    async fn get_libraries(&self, hashes: &[HashBytes]) -> ChainResult<Vec<(HashBytes, Bytes)>>;
}
