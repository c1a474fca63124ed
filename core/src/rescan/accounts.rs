use std::ops::RangeInclusive;

use anyhow::Context;

use super::{RescanScheduler, apply_parsed};
use crate::chain::AccountStateFilter;
use crate::models::{AccountState, ContractInterface, RescanTask, RescanTaskType};

impl RescanScheduler {
    /// Rewrites derived fields of the account states within the masters
    /// range. Returns only the states which have changed.
    pub(super) async fn rescan_accounts(
        &self,
        task: &RescanTask,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<AccountState>> {
        let contract = task.contract_name.as_str();

        let interface = match task.task_type {
            RescanTaskType::AddInterface | RescanTaskType::UpdInterface => {
                Some(self.load_interface(contract).await?)
            }
            _ => None,
        };

        let filter = match task.task_type {
            RescanTaskType::AddInterface => AccountStateFilter {
                interface: interface.clone(),
                with_type: None,
            },
            RescanTaskType::UpdInterface => AccountStateFilter {
                interface: interface.clone(),
                with_type: Some(contract.to_owned()),
            },
            _ => AccountStateFilter {
                interface: None,
                with_type: Some(contract.to_owned()),
            },
        };

        let states = self
            .repo
            .get_account_states_in_range(&filter, masters)
            .await?;

        let mut changed = Vec::new();
        for original in states {
            let mut state = original.clone();
            match task.task_type {
                RescanTaskType::AddInterface | RescanTaskType::UpdInterface => {
                    match &interface {
                        Some(interface) if interface.matches(&state) => {
                            self.reparse_interface(&mut state, interface).await?;
                        }
                        _ => state.clear_contract(contract, &[]),
                    }
                }
                RescanTaskType::DelInterface => state.clear_contract(contract, &[]),
                RescanTaskType::AddGetMethod | RescanTaskType::UpdGetMethod => {
                    let get_method = changed_get_method(task)?;
                    state.clear_get_method(contract, get_method);

                    let parsed = self
                        .parser
                        .execute_get_method(&state, contract, get_method, &self.states)
                        .await;
                    apply_parsed(&mut state, parsed)?;
                }
                RescanTaskType::DelGetMethod => {
                    state.clear_get_method(contract, changed_get_method(task)?);
                }
                RescanTaskType::UpdOperation | RescanTaskType::DelOperation => {}
            }

            if state != original {
                changed.push(state);
            }
        }

        Ok(changed)
    }

    async fn load_interface(&self, contract: &str) -> anyhow::Result<ContractInterface> {
        self.repo
            .get_contract_interface(contract)
            .await?
            .with_context(|| format!("contract interface `{contract}` is not defined"))
    }

    /// Clears everything the interface has produced and executes all of
    /// its get-methods again.
    async fn reparse_interface(
        &self,
        state: &mut AccountState,
        interface: &ContractInterface,
    ) -> anyhow::Result<()> {
        state.clear_contract(&interface.name, &interface.get_methods);
        state.add_interface(&interface.name);

        let types = [interface.name.clone()];
        let parsed = self
            .parser
            .parse_account_data(state, &types, &self.states)
            .await;
        apply_parsed(state, parsed)
    }
}

fn changed_get_method(task: &RescanTask) -> anyhow::Result<&str> {
    task.changed_get_method
        .as_deref()
        .with_context(|| format!("rescan task {} has no get-method", task.id))
}
