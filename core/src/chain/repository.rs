use std::ops::RangeInclusive;

use async_trait::async_trait;
use tycho_types::cell::HashBytes;
use tycho_types::models::StdAddr;

use crate::models::{
    AccountState, Block, ContractInterface, ContractName, ContractOperation, Message,
    MessageSource, MessageType, RescanTask, Transaction,
};

/// Selects account states for the interface rescan.
#[derive(Debug, Default, Clone)]
pub struct AccountStateFilter {
    /// States matching the interface definition.
    pub interface: Option<ContractInterface>,
    /// States already labeled with this interface.
    pub with_type: Option<ContractName>,
}

impl AccountStateFilter {
    pub fn matches(&self, state: &AccountState) -> bool {
        self.interface.as_ref().is_some_and(|i| i.matches(state))
            || self.with_type.as_deref().is_some_and(|t| state.has_interface(t))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    pub operation_id: Option<u32>,
    pub message_type: Option<MessageType>,
    /// `Some(true)` for messages with a known source side,
    /// `Some(false)` for ones with a known destination side.
    pub outgoing: Option<bool>,
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(op) = self.operation_id {
            if message.operation_id != Some(op) {
                return false;
            }
        }
        if let Some(ty) = self.message_type {
            if message.msg_type != ty {
                return false;
            }
        }
        match self.outgoing {
            Some(true) => message.src_tx.is_some(),
            Some(false) => message.dst_tx.is_some(),
            None => true,
        }
    }
}

/// An open multi-table write. Nothing is visible until [`RepositoryTx::commit`].
#[async_trait]
pub trait RepositoryTx: Send {
    async fn add_blocks(&mut self, blocks: &[Block]) -> anyhow::Result<()>;

    async fn add_account_states(&mut self, states: &[AccountState]) -> anyhow::Result<()>;

    async fn add_messages(&mut self, messages: &[Message]) -> anyhow::Result<()>;

    async fn add_transactions(&mut self, transactions: &[Transaction]) -> anyhow::Result<()>;

    /// Overwrites derived fields of existing account states.
    async fn update_account_states(&mut self, states: &[AccountState]) -> anyhow::Result<()>;

    /// Overwrites contract labels and parsed payloads of existing messages.
    async fn update_messages(&mut self, messages: &[Message]) -> anyhow::Result<()>;

    async fn set_rescan_task(&mut self, task: &RescanTask) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// Persistent store of the indexed entities.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn begin(&self) -> anyhow::Result<Box<dyn RepositoryTx>>;

    /// Returns the header of the earliest committed masterchain block.
    async fn get_first_master_block(&self) -> anyhow::Result<Option<Block>>;

    /// Returns the header of the latest committed masterchain block.
    async fn get_last_master_block(&self) -> anyhow::Result<Option<Block>>;

    /// Returns up to `limit` states of the address with `last_tx_lt < before_lt`,
    /// newest first.
    async fn get_all_account_states(
        &self,
        address: &StdAddr,
        before_lt: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<AccountState>>;

    /// Finds the committed transaction which produced the message.
    async fn find_message_source(&self, hash: &HashBytes) -> anyhow::Result<Option<MessageSource>>;

    async fn get_unfinished_rescan_task(&self) -> anyhow::Result<Option<RescanTask>>;

    async fn get_contract_interface(&self, name: &str) -> anyhow::Result<Option<ContractInterface>>;

    async fn get_contract_operation(
        &self,
        contract: &str,
        outgoing: bool,
        operation_id: u32,
    ) -> anyhow::Result<Option<ContractOperation>>;

    async fn get_account_states_in_range(
        &self,
        filter: &AccountStateFilter,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<AccountState>>;

    /// Returns messages whose latest known side belongs to the master range.
    async fn get_messages_in_range(
        &self,
        filter: &MessageFilter,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<Message>>;
}
