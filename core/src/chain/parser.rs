use async_trait::async_trait;
use tycho_types::models::StdAddr;

use crate::models::{AccountData, AccountState, ContractName, Message};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The contract does not expose the requested data.
    #[error("not available")]
    NotAvailable,
    /// The payload does not match any known schema.
    #[error("impossible parsing: {0}")]
    ImpossibleParsing(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Capability to read sibling accounts while parsing another one
/// (e.g. an NFT item resolving its collection).
#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// Returns the latest known state of the address with `last_tx_lt < before_lt`.
    ///
    /// Snapshot-backed implementations may ignore the bound and answer as of
    /// their snapshot.
    async fn get_account_state(
        &self,
        address: &StdAddr,
        before_lt: u64,
    ) -> anyhow::Result<Option<AccountState>>;
}

/// Contract-specific decoding.
#[async_trait]
pub trait Parser: Send + Sync + 'static {
    async fn determine_interfaces(&self, state: &AccountState) -> anyhow::Result<Vec<ContractName>>;

    /// Executes every get-method of the specified interfaces.
    async fn parse_account_data(
        &self,
        state: &AccountState,
        types: &[ContractName],
        lookup: &dyn AccountLookup,
    ) -> Result<AccountData, ParseError>;

    /// Executes a single get-method of one interface.
    async fn execute_get_method(
        &self,
        state: &AccountState,
        contract: &str,
        get_method: &str,
        lookup: &dyn AccountLookup,
    ) -> Result<AccountData, ParseError>;

    /// Fills the operation name and decoded payload of the message in place.
    async fn parse_message_payload(&self, message: &mut Message) -> Result<(), ParseError>;
}
