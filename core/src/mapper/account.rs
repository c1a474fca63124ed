use std::collections::BTreeMap;

use tycho_types::models::BlockId;

use crate::chain::{AccountLookup, ParseError, Parser, RawAccount};
use crate::models::{AccountState, ContentData};

pub fn map_account(
    raw: RawAccount,
    block: &BlockId,
    master_seqno: u32,
    updated_at: u32,
) -> AccountState {
    AccountState {
        address: raw.address,
        block: block.as_short_id(),
        master_seqno,
        updated_at,
        status: raw.status,
        balance: raw.balance,
        last_tx_lt: raw.last_tx_lt,
        last_tx_hash: raw.last_tx_hash,
        code: raw.code,
        code_hash: raw.code_hash,
        data: raw.data,
        data_hash: raw.data_hash,
        get_method_hashes: raw.get_method_hashes,
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

/// Fills contract fields of the interfaces the state is labeled with.
///
/// Parsing failures are recorded on the state and never propagated.
pub async fn parse_account_data(
    parser: &dyn Parser,
    state: &mut AccountState,
    lookup: &dyn AccountLookup,
) -> anyhow::Result<()> {
    if !state.is_active() || state.types.is_empty() {
        return Ok(());
    }

    let parsed = parser.parse_account_data(state, &state.types, lookup).await;
    match parsed {
        Ok(data) => state.apply_data(data),
        Err(ParseError::NotAvailable) => {}
        Err(ParseError::ImpossibleParsing(reason)) => {
            tracing::debug!(address = %state.address, %reason, "failed to parse account data");
            metrics::counter!("indexer_account_parse_errors").increment(1);
            state.error = Some(reason);
        }
        Err(ParseError::Other(e)) => return Err(e),
    }

    Ok(())
}
