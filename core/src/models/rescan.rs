use serde::{Deserialize, Serialize};

use super::{ContractName, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanTaskType {
    AddInterface,
    UpdInterface,
    DelInterface,
    AddGetMethod,
    UpdGetMethod,
    DelGetMethod,
    UpdOperation,
    DelOperation,
}

impl RescanTaskType {
    pub fn rescans_accounts(self) -> bool {
        !matches!(self, Self::UpdOperation | Self::DelOperation)
    }

    /// Interface changes relabel messages, operation changes reparse them.
    pub fn rescans_messages(self) -> bool {
        matches!(
            self,
            Self::AddInterface
                | Self::UpdInterface
                | Self::DelInterface
                | Self::UpdOperation
                | Self::DelOperation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanState {
    Pending,
    AccountsRescanning,
    MessagesRescanning,
    Finished,
}

/// A durable progress marker of reprocessing history under changed
/// contract definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanTask {
    pub id: u64,
    pub finished: bool,
    pub task_type: RescanTaskType,
    pub contract_name: ContractName,

    pub changed_get_method: Option<String>,
    pub message_type: Option<MessageType>,
    pub outgoing: bool,
    pub operation_id: Option<u32>,

    /// The last master block whose account states were rescanned.
    pub accounts_last_master: Option<u32>,
    pub accounts_rescan_done: bool,
    /// The last master block whose messages were rescanned.
    pub messages_last_master: Option<u32>,
    pub messages_rescan_done: bool,

    pub created_at: u32,
    pub updated_at: u32,
}

impl RescanTask {
    pub fn new(id: u64, task_type: RescanTaskType, contract_name: impl Into<String>) -> Self {
        let now = tvm_indexer_util::time::now_sec();
        Self {
            id,
            finished: false,
            task_type,
            contract_name: contract_name.into(),
            changed_get_method: None,
            message_type: None,
            outgoing: false,
            operation_id: None,
            accounts_last_master: None,
            accounts_rescan_done: false,
            messages_last_master: None,
            messages_rescan_done: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_get_method(mut self, get_method: impl Into<String>) -> Self {
        self.changed_get_method = Some(get_method.into());
        self
    }

    pub fn with_operation(mut self, message_type: MessageType, outgoing: bool, id: u32) -> Self {
        self.message_type = Some(message_type);
        self.outgoing = outgoing;
        self.operation_id = Some(id);
        self
    }

    pub fn state(&self) -> RescanState {
        if self.finished {
            RescanState::Finished
        } else if !self.accounts_rescan_done {
            if self.accounts_last_master.is_none() {
                RescanState::Pending
            } else {
                RescanState::AccountsRescanning
            }
        } else {
            RescanState::MessagesRescanning
        }
    }
}
