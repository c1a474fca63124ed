use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tycho_types::cell::HashBytes;
use tycho_types::models::{BlockIdShort, StdAddr};

pub type ContractName = String;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    NonExist,
    Uninit,
    Active,
    Frozen,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContentData {
    pub uri: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub image_data: Option<Bytes>,
}

impl ContentData {
    pub fn is_empty(&self) -> bool {
        self.uri.is_none()
            && self.name.is_none()
            && self.description.is_none()
            && self.image.is_none()
            && self.image_data.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetMethodExecution {
    pub name: String,
    pub returns: Vec<serde_json::Value>,
    pub error: Option<String>,
}

/// Account fields which are derived from get-method executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedField {
    Content,
    OwnerAddress,
    MinterAddress,
    JettonBalance,
    Fake,
}

impl DerivedField {
    /// Fields populated by the specified get-method.
    pub fn populated_by(get_method: &str) -> &'static [Self] {
        match get_method {
            "get_nft_data" => &[Self::OwnerAddress, Self::MinterAddress, Self::Fake],
            "get_wallet_data" => &[
                Self::JettonBalance,
                Self::OwnerAddress,
                Self::MinterAddress,
                Self::Fake,
            ],
            "get_collection_data" | "get_jetton_data" => &[Self::Content, Self::OwnerAddress],
            "get_nft_content" => &[Self::Content],
            _ => &[],
        }
    }
}

/// Output of the contract data parser.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AccountData {
    pub executed_get_methods: BTreeMap<ContractName, Vec<GetMethodExecution>>,
    pub content: Option<ContentData>,
    pub owner_address: Option<StdAddr>,
    pub minter_address: Option<StdAddr>,
    pub jetton_balance: Option<u128>,
    pub fake: bool,
}

/// Snapshot of an account after the transaction with `last_tx_lt`.
///
/// Snapshots are never mutated by the forward pipeline. Only the rescan
/// rewrites their derived fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub address: StdAddr,
    pub block: BlockIdShort,
    pub master_seqno: u32,
    pub updated_at: u32,

    pub status: AccountStatus,
    pub balance: u128,
    pub last_tx_lt: u64,
    pub last_tx_hash: HashBytes,

    pub code: Option<Bytes>,
    pub code_hash: Option<HashBytes>,
    pub data: Option<Bytes>,
    pub data_hash: Option<HashBytes>,
    pub get_method_hashes: Vec<u32>,

    pub types: Vec<ContractName>,
    pub executed_get_methods: BTreeMap<ContractName, Vec<GetMethodExecution>>,

    pub content: ContentData,
    pub owner_address: Option<StdAddr>,
    pub minter_address: Option<StdAddr>,
    pub jetton_balance: Option<u128>,
    pub fake: bool,
    pub error: Option<String>,
}

impl AccountState {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn has_interface(&self, contract: &str) -> bool {
        self.types.iter().any(|t| t == contract)
    }

    pub fn add_interface(&mut self, contract: &str) {
        if !self.has_interface(contract) {
            self.types.push(contract.to_owned());
        }
    }

    /// Merges parser output into the state.
    ///
    /// Get-method executions are replaced per contract, derived fields are
    /// only overwritten when the parser returned them. `fake` is reassigned
    /// when one of the executed methods derives it.
    pub fn apply_data(&mut self, data: AccountData) {
        let derives_fake = data
            .executed_get_methods
            .values()
            .flatten()
            .any(|e| DerivedField::populated_by(&e.name).contains(&DerivedField::Fake));

        for (contract, executions) in data.executed_get_methods {
            let entry = self.executed_get_methods.entry(contract).or_default();
            for execution in executions {
                match entry.iter_mut().find(|e| e.name == execution.name) {
                    Some(existing) => *existing = execution,
                    None => entry.push(execution),
                }
            }
        }

        if let Some(content) = data.content {
            self.content = content;
        }
        if data.owner_address.is_some() {
            self.owner_address = data.owner_address;
        }
        if data.minter_address.is_some() {
            self.minter_address = data.minter_address;
        }
        if data.jetton_balance.is_some() {
            self.jetton_balance = data.jetton_balance;
        }
        if derives_fake {
            self.fake = data.fake;
        } else {
            self.fake |= data.fake;
        }
    }

    pub fn clear_field(&mut self, field: DerivedField) {
        match field {
            DerivedField::Content => self.content = ContentData::default(),
            DerivedField::OwnerAddress => self.owner_address = None,
            DerivedField::MinterAddress => self.minter_address = None,
            DerivedField::JettonBalance => self.jetton_balance = None,
            DerivedField::Fake => self.fake = false,
        }
    }

    /// Removes a single get-method execution and every field it populates.
    pub fn clear_get_method(&mut self, contract: &str, get_method: &str) {
        if let Some(executions) = self.executed_get_methods.get_mut(contract) {
            executions.retain(|e| e.name != get_method);
            if executions.is_empty() {
                self.executed_get_methods.remove(contract);
            }
        }

        for field in DerivedField::populated_by(get_method) {
            self.clear_field(*field);
        }
    }

    /// Removes the interface with all of its get-method executions.
    ///
    /// `get_methods` extends the list of executed methods whose fields
    /// must be cleared.
    pub fn clear_contract(&mut self, contract: &str, get_methods: &[String]) {
        let mut methods = self
            .executed_get_methods
            .remove(contract)
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.name)
            .collect::<Vec<_>>();
        methods.extend(get_methods.iter().cloned());

        for method in &methods {
            for field in DerivedField::populated_by(method) {
                self.clear_field(*field);
            }
        }

        self.types.retain(|t| t != contract);
        if self.types.is_empty() {
            self.fake = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account_state, std_addr};

    fn nft_item() -> AccountState {
        let mut state = account_state(std_addr(0, 1), 10);
        state.types = vec!["nft_item".to_owned()];
        state.owner_address = Some(std_addr(0, 2));
        state.minter_address = Some(std_addr(0, 3));
        state.content.uri = Some("ipfs://item".to_owned());
        state.jetton_balance = Some(5);
        state.fake = true;
        state.executed_get_methods.insert("nft_item".to_owned(), vec![
            GetMethodExecution {
                name: "get_nft_data".to_owned(),
                returns: Vec::new(),
                error: None,
            },
            GetMethodExecution {
                name: "get_nft_content".to_owned(),
                returns: Vec::new(),
                error: None,
            },
        ]);
        state
    }

    #[test]
    fn clear_get_method_keeps_unrelated_fields() {
        let mut state = nft_item();
        state.clear_get_method("nft_item", "get_nft_data");

        assert_eq!(state.owner_address, None);
        assert_eq!(state.minter_address, None);
        assert!(!state.fake);
        assert_eq!(state.content.uri.as_deref(), Some("ipfs://item"));
        assert_eq!(state.jetton_balance, Some(5));

        let executions = &state.executed_get_methods["nft_item"];
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].name, "get_nft_content");
    }

    #[test]
    fn clear_contract_drops_interface() {
        let mut state = nft_item();
        state.clear_contract("nft_item", &[]);

        assert!(state.types.is_empty());
        assert!(state.executed_get_methods.is_empty());
        assert!(state.content.is_empty());
        assert_eq!(state.owner_address, None);
        assert_eq!(state.jetton_balance, Some(5));
    }

    #[test]
    fn apply_data_replaces_executions() {
        let mut state = nft_item();
        let mut data = AccountData {
            owner_address: Some(std_addr(0, 9)),
            ..Default::default()
        };
        data.executed_get_methods.insert("nft_item".to_owned(), vec![GetMethodExecution {
            name: "get_nft_data".to_owned(),
            returns: vec![serde_json::json!(true)],
            error: None,
        }]);

        state.apply_data(data.clone());
        let once = state.clone();
        state.apply_data(data);

        assert_eq!(state, once);
        assert_eq!(state.owner_address, Some(std_addr(0, 9)));
        assert_eq!(state.minter_address, Some(std_addr(0, 3)));
        assert_eq!(state.executed_get_methods["nft_item"].len(), 2);
    }

    #[test]
    fn apply_data_rederives_fake() {
        let mut state = nft_item();
        let execution = |name: &str| GetMethodExecution {
            name: name.to_owned(),
            returns: Vec::new(),
            error: None,
        };

        // Content does not derive `fake`
        let mut data = AccountData::default();
        data.executed_get_methods
            .insert("nft_item".to_owned(), vec![execution("get_nft_content")]);
        state.apply_data(data);
        assert!(state.fake);

        let mut data = AccountData::default();
        data.executed_get_methods
            .insert("nft_item".to_owned(), vec![execution("get_nft_data")]);
        state.apply_data(data);
        assert!(!state.fake);
    }
}
