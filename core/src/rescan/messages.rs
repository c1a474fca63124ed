use std::ops::RangeInclusive;

use anyhow::Context;

use super::RescanScheduler;
use crate::chain::MessageFilter;
use crate::mapper;
use crate::models::{ContractName, Message, RescanTask, RescanTaskType};

impl RescanScheduler {
    /// Rewrites contract labels and parsed payloads of the messages within
    /// the masters range. Returns only the messages which have changed.
    pub(super) async fn rescan_messages(
        &self,
        task: &RescanTask,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<Message>> {
        match task.task_type {
            RescanTaskType::UpdOperation | RescanTaskType::DelOperation => {
                self.rescan_operation(task, masters).await
            }
            RescanTaskType::AddInterface
            | RescanTaskType::UpdInterface
            | RescanTaskType::DelInterface => self.relabel_messages(task, masters).await,
            _ => Ok(Vec::new()),
        }
    }

    async fn rescan_operation(
        &self,
        task: &RescanTask,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<Message>> {
        let operation_id = task
            .operation_id
            .with_context(|| format!("rescan task {} has no operation id", task.id))?;

        let mut message_type = task.message_type;
        if task.task_type == RescanTaskType::UpdOperation {
            let operation = self
                .repo
                .get_contract_operation(&task.contract_name, task.outgoing, operation_id)
                .await?
                .with_context(|| {
                    format!(
                        "operation {operation_id:#010x} of contract `{}` is not defined",
                        task.contract_name
                    )
                })?;
            message_type = message_type.or(Some(operation.message_type));
        }

        let filter = MessageFilter {
            operation_id: Some(operation_id),
            message_type,
            outgoing: Some(task.outgoing),
        };
        let messages = self.repo.get_messages_in_range(&filter, masters).await?;

        let mut changed = Vec::new();
        for original in messages {
            if !self
                .side_has_interface(&original, task.outgoing, &task.contract_name)
                .await?
            {
                continue;
            }

            let mut msg = original.clone();
            msg.clear_parsed();
            if task.task_type == RescanTaskType::UpdOperation {
                mapper::parse_message_payload(self.parser.as_ref(), &mut msg).await?;
            }

            if msg != original {
                changed.push(msg);
            }
        }

        Ok(changed)
    }

    async fn relabel_messages(
        &self,
        task: &RescanTask,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<Message>> {
        let messages = self
            .repo
            .get_messages_in_range(&MessageFilter::default(), masters)
            .await?;

        let contract = &task.contract_name;

        let mut changed = Vec::new();
        for original in messages {
            let mut msg = original.clone();

            let mut relabeled = false;
            for outgoing in [true, false] {
                let Some(label) = self.side_label(&msg, outgoing).await? else {
                    continue;
                };

                let current = msg.contract(outgoing);
                let involved = current == Some(contract) || label.as_ref() == Some(contract);
                if involved && current != label.as_ref() {
                    msg.set_contract(outgoing, label);
                    relabeled = true;
                }
            }

            if relabeled {
                msg.clear_parsed();
                mapper::parse_message_payload(self.parser.as_ref(), &mut msg).await?;
                changed.push(msg);
            }
        }

        Ok(changed)
    }

    /// Contract label of the message side as of its transaction.
    ///
    /// Returns `None` when the side has no transaction or no known state.
    async fn side_label(
        &self,
        msg: &Message,
        outgoing: bool,
    ) -> anyhow::Result<Option<Option<ContractName>>> {
        let (Some(address), Some(tx)) = msg.side(outgoing) else {
            return Ok(None);
        };

        let state = self.states.get_before(address, tx.lt.saturating_add(1)).await?;
        Ok(state.map(|state| state.types.first().cloned()))
    }

    async fn side_has_interface(
        &self,
        msg: &Message,
        outgoing: bool,
        contract: &str,
    ) -> anyhow::Result<bool> {
        let (Some(address), Some(tx)) = msg.side(outgoing) else {
            return Ok(false);
        };

        Ok(
            match self.states.get_before(address, tx.lt.saturating_add(1)).await? {
                Some(state) => state.has_interface(contract),
                None => msg.contract(outgoing).is_some_and(|c| c == contract),
            },
        )
    }
}
