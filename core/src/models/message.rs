use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockIdShort, StdAddr};

use super::ContractName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Internal,
    ExternalIn,
    ExternalOut,
}

/// A reference to one side of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionRef {
    pub hash: HashBytes,
    pub lt: u64,
    pub block: BlockIdShort,
    pub master_seqno: u32,
}

/// Source side of a message recovered from already committed history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSource {
    pub tx: TransactionRef,
    pub contract: Option<ContractName>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub hash: HashBytes,
    pub msg_type: MessageType,

    pub src_address: Option<StdAddr>,
    pub dst_address: Option<StdAddr>,
    pub src_tx: Option<TransactionRef>,
    pub dst_tx: Option<TransactionRef>,
    pub src_contract: Option<ContractName>,
    pub dst_contract: Option<ContractName>,

    pub bounce: bool,
    pub bounced: bool,
    pub amount: u128,
    pub ihr_fee: u128,
    pub fwd_fee: u128,
    pub import_fee: u128,
    pub created_lt: u64,
    pub created_at: u32,

    pub state_init_code: Option<Bytes>,
    pub state_init_data: Option<Bytes>,
    pub body: Bytes,

    pub operation_id: Option<u32>,
    pub operation_name: Option<String>,
    pub data_json: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Message {
    /// Whether all sides this message type can have are known.
    pub fn is_resolved(&self) -> bool {
        match self.msg_type {
            MessageType::Internal => self.src_tx.is_some() && self.dst_tx.is_some(),
            MessageType::ExternalIn => self.dst_tx.is_some(),
            MessageType::ExternalOut => self.src_tx.is_some(),
        }
    }

    /// Seqno of the masterchain block which finalized the latest known side.
    pub fn master_seqno(&self) -> Option<u32> {
        self.dst_tx.or(self.src_tx).map(|tx| tx.master_seqno)
    }

    /// Side of the message owned by the specified direction.
    pub fn side(&self, outgoing: bool) -> (Option<&StdAddr>, Option<&TransactionRef>) {
        if outgoing {
            (self.src_address.as_ref(), self.src_tx.as_ref())
        } else {
            (self.dst_address.as_ref(), self.dst_tx.as_ref())
        }
    }

    pub fn contract(&self, outgoing: bool) -> Option<&ContractName> {
        if outgoing {
            self.src_contract.as_ref()
        } else {
            self.dst_contract.as_ref()
        }
    }

    pub fn set_contract(&mut self, outgoing: bool, contract: Option<ContractName>) {
        if outgoing {
            self.src_contract = contract;
        } else {
            self.dst_contract = contract;
        }
    }

    /// Fills the missing side of this record from the counterpart record
    /// of the same message.
    pub fn merge(&mut self, other: Message) {
        debug_assert_eq!(self.hash, other.hash);

        if self.src_tx.is_none() {
            self.src_tx = other.src_tx;
        }
        if self.dst_tx.is_none() {
            self.dst_tx = other.dst_tx;
        }
        if self.src_contract.is_none() {
            self.src_contract = other.src_contract;
        }
        if self.dst_contract.is_none() {
            self.dst_contract = other.dst_contract;
        }
    }

    /// Drops everything the payload parser has produced.
    pub fn clear_parsed(&mut self) {
        self.operation_name = None;
        self.data_json = None;
        self.error = None;
    }
}
