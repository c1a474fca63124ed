use async_trait::async_trait;
use tycho_types::models::StdAddr;

use super::Fetcher;
use crate::chain::{AccountLookup, BlockHeader};
use crate::models::AccountState;

/// Serves sibling account reads from the chain as of a master block.
///
/// Every read answers from the account snapshot at the end of that master
/// block, `before_lt` is not applied. Returned states carry interfaces but
/// are never parsed further.
pub struct ChainAccountLookup<'a> {
    fetcher: &'a Fetcher,
    master: &'a BlockHeader,
}

impl<'a> ChainAccountLookup<'a> {
    pub fn new(fetcher: &'a Fetcher, master: &'a BlockHeader) -> Self {
        Self { fetcher, master }
    }
}

#[async_trait]
impl AccountLookup for ChainAccountLookup<'_> {
    async fn get_account_state(
        &self,
        address: &StdAddr,
        _before_lt: u64,
    ) -> anyhow::Result<Option<AccountState>> {
        let state = self
            .fetcher
            .get_account(self.master, self.master.id.seqno, address)
            .await?;

        Ok(state.is_active().then(|| AccountState::clone(&state)))
    }
}
