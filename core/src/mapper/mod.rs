//! Conversion of raw chain objects into indexed entities.
//!
//! Everything here is pure except [`parse_account_data`] and
//! [`parse_message_payload`], which consult the contract parser.

use tycho_types::models::{BlockId, StdAddr};

pub use self::account::{map_account, parse_account_data};
use crate::chain::{ParseError, Parser, RawMessage, RawMessageInfo, RawTransaction};
use crate::models::{Message, MessageType, Transaction, TransactionRef};

mod account;

/// Maps a raw transaction with partially linked messages.
///
/// The inbound message only knows its destination, outbound messages only
/// know their source.
pub fn map_transaction(raw: RawTransaction, block: &BlockId, master_seqno: u32) -> Transaction {
    let tx_ref = TransactionRef {
        hash: raw.hash,
        lt: raw.lt,
        block: block.as_short_id(),
        master_seqno,
    };

    let in_msg = raw.in_msg.map(|msg| {
        let mut msg = map_message(msg);
        msg.dst_tx = Some(tx_ref);
        msg
    });

    let out_msgs = raw
        .out_msgs
        .into_iter()
        .map(|msg| {
            let mut msg = map_message(msg);
            msg.src_tx = Some(tx_ref);
            msg
        })
        .collect::<Vec<_>>();

    Transaction {
        address: raw.account,
        hash: raw.hash,
        lt: raw.lt,
        prev_tx_hash: raw.prev_tx_hash,
        prev_tx_lt: raw.prev_tx_lt,
        block: tx_ref.block,
        master_seqno,
        created_at: raw.now,
        total_fees: raw.total_fees,
        orig_status: raw.orig_status,
        end_status: raw.end_status,
        aborted: raw.aborted,
        compute_exit_code: raw.compute_exit_code,
        in_msg_hash: in_msg.as_ref().map(|msg| msg.hash),
        out_msg_hashes: out_msgs.iter().map(|msg| msg.hash).collect(),
        in_msg,
        out_msgs,
    }
}

/// Maps a raw message without any transaction linkage.
pub fn map_message(raw: RawMessage) -> Message {
    let mut msg = Message {
        hash: raw.hash,
        msg_type: MessageType::Internal,
        src_address: None,
        dst_address: None,
        src_tx: None,
        dst_tx: None,
        src_contract: None,
        dst_contract: None,
        bounce: false,
        bounced: false,
        amount: 0,
        ihr_fee: 0,
        fwd_fee: 0,
        import_fee: 0,
        created_lt: 0,
        created_at: 0,
        state_init_code: raw.init_code,
        state_init_data: raw.init_data,
        body: raw.body,
        operation_id: raw.op_code,
        operation_name: None,
        data_json: None,
        error: None,
    };

    match raw.info {
        RawMessageInfo::Internal {
            src,
            dst,
            value,
            ihr_fee,
            fwd_fee,
            bounce,
            bounced,
            created_lt,
            created_at,
        } => {
            msg.src_address = Some(src);
            msg.dst_address = Some(dst);
            msg.amount = value;
            msg.ihr_fee = ihr_fee;
            msg.fwd_fee = fwd_fee;
            msg.bounce = bounce;
            msg.bounced = bounced;
            msg.created_lt = created_lt;
            msg.created_at = created_at;
        }
        RawMessageInfo::ExternalIn { dst, import_fee } => {
            msg.msg_type = MessageType::ExternalIn;
            msg.dst_address = Some(dst);
            msg.import_fee = import_fee;
        }
        RawMessageInfo::ExternalOut {
            src,
            created_lt,
            created_at,
        } => {
            msg.msg_type = MessageType::ExternalOut;
            msg.src_address = Some(src);
            msg.created_lt = created_lt;
            msg.created_at = created_at;
        }
    }

    msg
}

/// Decodes the message body in place.
///
/// Unknown payloads are recorded on the message and never propagated.
pub async fn parse_message_payload(parser: &dyn Parser, msg: &mut Message) -> anyhow::Result<()> {
    match parser.parse_message_payload(msg).await {
        Ok(()) | Err(ParseError::NotAvailable) => Ok(()),
        Err(ParseError::ImpossibleParsing(reason)) => {
            metrics::counter!("indexer_message_parse_errors").increment(1);
            tracing::debug!(hash = %msg.hash, %reason, "failed to parse message payload");
            msg.error = Some(reason);
            Ok(())
        }
        Err(ParseError::Other(e)) => Err(e),
    }
}

/// Addresses of the masterchain system contracts (zero, elector, config).
pub fn is_system_address(address: &StdAddr) -> bool {
    address.workchain == -1
        && [0x00, 0x33, 0x55]
            .iter()
            .any(|byte| address.address.0.iter().all(|b| b == byte))
}
