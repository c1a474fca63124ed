use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tvm_indexer_util::FastHashMap;

use crate::chain::{AccountLookup, ParseError, Parser};
use crate::models::{
    AccountData, AccountState, ContractInterface, ContractName, GetMethodExecution, Message,
};

/// A contract parser driven by registered interfaces and canned get-method
/// results.
///
/// A get-method result with `minter_address` set resolves the minter through
/// the account lookup and marks the account as fake when the minter has no
/// interfaces.
#[derive(Default)]
pub struct TestParser {
    interfaces: Mutex<Vec<ContractInterface>>,
    get_methods: Mutex<FastHashMap<(ContractName, String), AccountData>>,
    operations: Mutex<FastHashMap<u32, String>>,
    get_method_calls: AtomicUsize,
    lookups: AtomicUsize,
}

impl TestParser {
    pub fn add_interface(&self, interface: ContractInterface) {
        let mut interfaces = self.interfaces.lock();
        interfaces.retain(|i| i.name != interface.name);
        interfaces.push(interface);
    }

    pub fn remove_interface(&self, name: &str) {
        self.interfaces.lock().retain(|i| i.name != name);
    }

    pub fn set_get_method(&self, contract: &str, get_method: &str, result: AccountData) {
        self.get_methods
            .lock()
            .insert((contract.to_owned(), get_method.to_owned()), result);
    }

    pub fn set_operation(&self, operation_id: u32, name: &str) {
        self.operations.lock().insert(operation_id, name.to_owned());
    }

    pub fn remove_operation(&self, operation_id: u32) {
        self.operations.lock().remove(&operation_id);
    }

    pub fn get_method_calls(&self) -> usize {
        self.get_method_calls.load(Ordering::Acquire)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Acquire)
    }

    fn get_methods_of(&self, contract: &str) -> Vec<String> {
        self.interfaces
            .lock()
            .iter()
            .find(|i| i.name == contract)
            .map(|i| i.get_methods.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Parser for TestParser {
    async fn determine_interfaces(&self, state: &AccountState) -> anyhow::Result<Vec<ContractName>> {
        let interfaces = self.interfaces.lock();
        Ok(interfaces
            .iter()
            .filter(|i| i.matches(state))
            .map(|i| i.name.clone())
            .collect())
    }

    async fn parse_account_data(
        &self,
        state: &AccountState,
        types: &[ContractName],
        lookup: &dyn AccountLookup,
    ) -> Result<AccountData, ParseError> {
        let mut data = AccountData::default();
        let mut found = false;

        for contract in types {
            for get_method in self.get_methods_of(contract) {
                match self.execute_get_method(state, contract, &get_method, lookup).await {
                    Ok(result) => {
                        found = true;
                        merge(&mut data, result);
                    }
                    Err(ParseError::NotAvailable) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if found {
            Ok(data)
        } else {
            Err(ParseError::NotAvailable)
        }
    }

    async fn execute_get_method(
        &self,
        state: &AccountState,
        contract: &str,
        get_method: &str,
        lookup: &dyn AccountLookup,
    ) -> Result<AccountData, ParseError> {
        let result = self
            .get_methods
            .lock()
            .get(&(contract.to_owned(), get_method.to_owned()))
            .cloned();
        let Some(mut data) = result else {
            return Err(ParseError::NotAvailable);
        };
        self.get_method_calls.fetch_add(1, Ordering::AcqRel);

        if let Some(minter) = &data.minter_address {
            self.lookups.fetch_add(1, Ordering::AcqRel);
            let minter = lookup.get_account_state(minter, state.last_tx_lt).await?;
            data.fake = minter.is_none_or(|minter| minter.types.is_empty());
        }

        data.executed_get_methods = BTreeMap::from([(contract.to_owned(), vec![
            GetMethodExecution {
                name: get_method.to_owned(),
                returns: Vec::new(),
                error: None,
            },
        ])]);
        Ok(data)
    }

    async fn parse_message_payload(&self, message: &mut Message) -> Result<(), ParseError> {
        let Some(operation_id) = message.operation_id else {
            return Err(ParseError::NotAvailable);
        };

        let name = self.operations.lock().get(&operation_id).cloned();
        match name {
            Some(name) => {
                message.data_json = Some(serde_json::json!({ "op": name }));
                message.operation_name = Some(name);
                Ok(())
            }
            None => Err(ParseError::ImpossibleParsing(format!(
                "unknown operation {operation_id:#010x}"
            ))),
        }
    }
}

fn merge(target: &mut AccountData, data: AccountData) {
    for (contract, executions) in data.executed_get_methods {
        target
            .executed_get_methods
            .entry(contract)
            .or_default()
            .extend(executions);
    }
    if data.content.is_some() {
        target.content = data.content;
    }
    if data.owner_address.is_some() {
        target.owner_address = data.owner_address;
    }
    if data.minter_address.is_some() {
        target.minter_address = data.minter_address;
    }
    if data.jetton_balance.is_some() {
        target.jetton_balance = data.jetton_balance;
    }
    target.fake |= data.fake;
}
