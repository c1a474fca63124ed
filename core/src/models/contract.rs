use tycho_types::cell::HashBytes;
use tycho_types::models::StdAddr;

use super::{AccountState, ContractName, MessageType};

/// Definition of a contract interface as registered by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInterface {
    pub name: ContractName,
    pub addresses: Vec<StdAddr>,
    pub code_hash: Option<HashBytes>,
    pub get_method_hashes: Vec<u32>,
    pub get_methods: Vec<String>,
}

impl ContractInterface {
    /// Checks the address, code hash and get-method filters (in that order).
    pub fn matches(&self, state: &AccountState) -> bool {
        if self.addresses.contains(&state.address) {
            return true;
        }

        if let Some(code_hash) = &self.code_hash {
            return state.code_hash.as_ref() == Some(code_hash);
        }

        !self.get_method_hashes.is_empty()
            && self
                .get_method_hashes
                .iter()
                .all(|hash| state.get_method_hashes.contains(hash))
    }
}

/// Definition of a message schema for one direction of one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractOperation {
    pub contract_name: ContractName,
    pub message_type: MessageType,
    pub outgoing: bool,
    pub operation_id: u32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account_state, std_addr};

    fn interface() -> ContractInterface {
        ContractInterface {
            name: "jetton_wallet".to_owned(),
            addresses: vec![std_addr(0, 7)],
            code_hash: None,
            get_method_hashes: vec![97026, 81689],
            get_methods: vec!["get_wallet_data".to_owned()],
        }
    }

    #[test]
    fn matches_by_get_methods() {
        let iface = interface();

        let mut state = account_state(std_addr(0, 1), 1);
        state.get_method_hashes = vec![1, 81689, 97026];
        assert!(iface.matches(&state));

        state.get_method_hashes = vec![97026];
        assert!(!iface.matches(&state));

        let state = account_state(std_addr(0, 7), 1);
        assert!(iface.matches(&state));
    }

    #[test]
    fn code_hash_is_exclusive() {
        let mut iface = interface();
        iface.code_hash = Some(HashBytes([1; 32]));

        let mut state = account_state(std_addr(0, 1), 1);
        state.get_method_hashes = vec![97026, 81689];
        assert!(!iface.matches(&state));

        state.code_hash = Some(HashBytes([1; 32]));
        assert!(iface.matches(&state));
    }
}
