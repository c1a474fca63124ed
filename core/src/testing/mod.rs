//! In-memory doubles of the chain, the contract parser and the repository.

use std::collections::BTreeMap;

use bytes::Bytes;
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockId, BlockIdShort, ShardIdent, StdAddr};

pub use self::chain::TestChain;
pub use self::parser::TestParser;
pub use self::repository::MemoryRepository;
use crate::chain::{BlockHeader, RawAccount, RawMessage, RawMessageInfo, RawTransaction};
use crate::models::{AccountState, AccountStatus, ContentData};

mod chain;
mod parser;
mod repository;

pub const GEN_UTIME_BASE: u32 = 1_700_000_000;
pub const LT_PER_BLOCK: u64 = 1_000_000;

pub fn shard(workchain: i32, prefix: u64) -> ShardIdent {
    ShardIdent::new(workchain, prefix).expect("valid shard prefix")
}

/// A block id with hashes derived from the shard and seqno.
pub fn block_id(shard: ShardIdent, seqno: u32) -> BlockId {
    let mut root_hash = [0u8; 32];
    root_hash[..4].copy_from_slice(&shard.workchain().to_be_bytes());
    root_hash[4..12].copy_from_slice(&shard.prefix().to_be_bytes());
    root_hash[12..16].copy_from_slice(&seqno.to_be_bytes());

    let mut file_hash = root_hash;
    file_hash[31] = 0xff;

    BlockId {
        shard,
        seqno,
        root_hash: HashBytes(root_hash),
        file_hash: HashBytes(file_hash),
    }
}

pub fn master_id(seqno: u32) -> BlockId {
    block_id(ShardIdent::MASTERCHAIN, seqno)
}

/// A header whose LT range is derived from the seqno.
pub fn header(id: BlockId, prev_blocks: Vec<BlockId>) -> BlockHeader {
    let start_lt = id.seqno as u64 * LT_PER_BLOCK;
    BlockHeader {
        id,
        gen_utime: GEN_UTIME_BASE + id.seqno,
        start_lt,
        end_lt: start_lt + LT_PER_BLOCK - 1,
        after_split: false,
        after_merge: prev_blocks.len() > 1,
        prev_blocks,
    }
}

pub fn std_addr(workchain: i8, byte: u8) -> StdAddr {
    StdAddr::new(workchain, HashBytes([byte; 32]))
}

pub fn internal_message(hash: u8, src: &StdAddr, dst: &StdAddr, created_lt: u64) -> RawMessage {
    RawMessage {
        hash: HashBytes([hash; 32]),
        info: RawMessageInfo::Internal {
            src: src.clone(),
            dst: dst.clone(),
            value: 1_000_000_000,
            ihr_fee: 0,
            fwd_fee: 1_000,
            bounce: true,
            bounced: false,
            created_lt,
            created_at: GEN_UTIME_BASE,
        },
        body: Bytes::new(),
        op_code: None,
        init_code: None,
        init_data: None,
    }
}

pub fn external_message(hash: u8, dst: &StdAddr) -> RawMessage {
    RawMessage {
        hash: HashBytes([hash; 32]),
        info: RawMessageInfo::ExternalIn {
            dst: dst.clone(),
            import_fee: 0,
        },
        body: Bytes::new(),
        op_code: None,
        init_code: None,
        init_data: None,
    }
}

/// Sets the operation id of the message.
pub fn with_op(mut msg: RawMessage, op: u32) -> RawMessage {
    msg.body = Bytes::copy_from_slice(&op.to_be_bytes());
    msg.op_code = Some(op);
    msg
}

/// Transaction hash derived from the account and LT.
pub fn transaction_hash(account: &StdAddr, lt: u64) -> HashBytes {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&lt.to_be_bytes());
    hash[8..].copy_from_slice(&account.address.0[..24]);
    HashBytes(hash)
}

pub fn transaction(
    account: &StdAddr,
    lt: u64,
    in_msg: Option<RawMessage>,
    out_msgs: Vec<RawMessage>,
) -> RawTransaction {
    RawTransaction {
        hash: transaction_hash(account, lt),
        lt,
        account: account.clone(),
        prev_tx_hash: HashBytes::ZERO,
        prev_tx_lt: 0,
        now: GEN_UTIME_BASE,
        total_fees: 1_000,
        orig_status: AccountStatus::Active,
        end_status: AccountStatus::Active,
        aborted: false,
        compute_exit_code: Some(0),
        in_msg,
        out_msgs,
    }
}

pub fn raw_account(address: &StdAddr, last_tx_lt: u64) -> RawAccount {
    RawAccount {
        address: address.clone(),
        status: AccountStatus::Active,
        balance: 1_000_000_000,
        last_tx_lt,
        last_tx_hash: transaction_hash(address, last_tx_lt),
        code: Some(Bytes::from_static(b"code")),
        code_hash: Some(HashBytes([0xc0; 32])),
        library_code: None,
        data: Some(Bytes::from_static(b"data")),
        data_hash: Some(HashBytes([0xda; 32])),
        get_method_hashes: Vec::new(),
    }
}

/// An active account state without any interfaces.
pub fn account_state(address: StdAddr, last_tx_lt: u64) -> AccountState {
    let master_seqno = (last_tx_lt / LT_PER_BLOCK) as u32;
    AccountState {
        last_tx_hash: transaction_hash(&address, last_tx_lt),
        address,
        block: BlockIdShort {
            shard: ShardIdent::BASECHAIN,
            seqno: master_seqno,
        },
        master_seqno,
        updated_at: GEN_UTIME_BASE + master_seqno,
        status: AccountStatus::Active,
        balance: 1_000_000_000,
        last_tx_lt,
        code: None,
        code_hash: None,
        data: None,
        data_hash: None,
        get_method_hashes: Vec::new(),
        types: Vec::new(),
        executed_get_methods: BTreeMap::new(),
        content: ContentData::default(),
        owner_address: None,
        minter_address: None,
        jetton_balance: None,
        fake: false,
        error: None,
    }
}
