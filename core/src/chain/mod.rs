//! Seams to the collaborators the indexer does not implement itself:
//! the chain node transport, the contract parser and the persistent store.

pub use self::client::{
    BlockHeader, ChainClient, ChainError, ChainResult, RawAccount, RawMessage, RawMessageInfo,
    RawTransaction, TransactionId,
};
pub use self::parser::{AccountLookup, ParseError, Parser};
pub use self::repository::{AccountStateFilter, MessageFilter, Repository, RepositoryTx};

mod client;
mod parser;
mod repository;
