use tycho_types::models::{BlockId, BlockIdShort};

use super::Transaction;

/// A masterchain or shardchain block with its mapped transactions.
///
/// Shard blocks are bound to the masterchain block which references them.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub master_id: Option<BlockIdShort>,
    pub gen_utime: u32,
    pub start_lt: u64,
    pub end_lt: u64,
    pub scanned_at: u32,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn is_masterchain(&self) -> bool {
        self.id.is_masterchain()
    }

    /// Seqno of the masterchain block this block belongs to.
    pub fn master_seqno(&self) -> u32 {
        match &self.master_id {
            Some(master) => master.seqno,
            None => self.id.seqno,
        }
    }

    /// Returns a copy of the block header without transactions.
    pub fn header(&self) -> Self {
        Self {
            transactions: Vec::new(),
            ..self.clone()
        }
    }
}
