pub use self::account::{
    AccountData, AccountState, AccountStatus, ContentData, ContractName, DerivedField,
    GetMethodExecution,
};
pub use self::block::Block;
pub use self::contract::{ContractInterface, ContractOperation};
pub use self::message::{Message, MessageSource, MessageType, TransactionRef};
pub use self::rescan::{RescanState, RescanTask, RescanTaskType};
pub use self::transaction::Transaction;

mod account;
mod block;
mod contract;
mod message;
mod rescan;
mod transaction;
