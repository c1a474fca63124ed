use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockIdShort, StdAddr};

use super::{AccountStatus, Message, TransactionRef};

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub address: StdAddr,
    pub hash: HashBytes,
    pub lt: u64,
    pub prev_tx_hash: HashBytes,
    pub prev_tx_lt: u64,

    pub block: BlockIdShort,
    pub master_seqno: u32,
    pub created_at: u32,

    pub total_fees: u128,
    pub orig_status: AccountStatus,
    pub end_status: AccountStatus,
    pub aborted: bool,
    pub compute_exit_code: Option<i32>,

    pub in_msg_hash: Option<HashBytes>,
    pub out_msg_hashes: Vec<HashBytes>,

    /// Partially linked inbound message. Taken by the message linker.
    pub in_msg: Option<Message>,
    /// Partially linked outbound messages. Taken by the message linker.
    pub out_msgs: Vec<Message>,
}

impl Transaction {
    pub fn tx_ref(&self) -> TransactionRef {
        TransactionRef {
            hash: self.hash,
            lt: self.lt,
            block: self.block,
            master_seqno: self.master_seqno,
        }
    }

    /// Moves all partial messages out of the transaction.
    pub fn take_messages(&mut self) -> impl Iterator<Item = Message> + use<> {
        let in_msg = self.in_msg.take();
        let out_msgs = std::mem::take(&mut self.out_msgs);
        in_msg.into_iter().chain(out_msgs)
    }
}
