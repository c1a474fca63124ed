use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tycho_types::cell::HashBytes;
use tycho_types::models::StdAddr;
use tvm_indexer_util::FastHashMap;

use crate::chain::{AccountStateFilter, MessageFilter, Repository, RepositoryTx};
use crate::models::{
    AccountState, Block, ContractInterface, ContractOperation, Message, MessageSource, RescanTask,
    Transaction,
};

/// A repository which keeps everything in memory.
///
/// Writes are staged in the transaction and applied atomically on commit.
#[derive(Default, Clone)]
pub struct MemoryRepository {
    state: Arc<Mutex<RepositoryState>>,
}

#[derive(Default)]
struct RepositoryState {
    blocks: Vec<Block>,
    account_states: Vec<AccountState>,
    messages: FastHashMap<HashBytes, Message>,
    transactions: Vec<Transaction>,
    rescan_tasks: BTreeMap<u64, RescanTask>,
    interfaces: FastHashMap<String, ContractInterface>,
    operations: Vec<ContractOperation>,
    commits: Vec<Vec<u32>>,
    failing_commits: usize,
}

impl MemoryRepository {
    pub fn add_interface(&self, interface: ContractInterface) {
        self.state
            .lock()
            .interfaces
            .insert(interface.name.clone(), interface);
    }

    pub fn remove_interface(&self, name: &str) {
        self.state.lock().interfaces.remove(name);
    }

    pub fn add_operation(&self, operation: ContractOperation) {
        self.state.lock().operations.push(operation);
    }

    pub fn add_rescan_task(&self, task: RescanTask) {
        self.state.lock().rescan_tasks.insert(task.id, task);
    }

    /// Makes the next `count` commits fail.
    pub fn fail_commits(&self, count: usize) {
        self.state.lock().failing_commits = count;
    }

    pub fn rescan_task(&self, id: u64) -> Option<RescanTask> {
        self.state.lock().rescan_tasks.get(&id).cloned()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().transactions.clone()
    }

    pub fn message(&self, hash: &HashBytes) -> Option<Message> {
        self.state.lock().messages.get(hash).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.values().cloned().collect()
    }

    /// All states of the address, oldest first.
    pub fn account_states(&self, address: &StdAddr) -> Vec<AccountState> {
        let mut states = self
            .state
            .lock()
            .account_states
            .iter()
            .filter(|s| &s.address == address)
            .cloned()
            .collect::<Vec<_>>();
        states.sort_by_key(|s| s.last_tx_lt);
        states
    }

    /// Masterchain seqnos of every successful commit, in commit order.
    pub fn commits(&self) -> Vec<Vec<u32>> {
        self.state.lock().commits.clone()
    }
}

enum Write {
    Blocks(Vec<Block>),
    AddAccountStates(Vec<AccountState>),
    AddMessages(Vec<Message>),
    Transactions(Vec<Transaction>),
    UpdateAccountStates(Vec<AccountState>),
    UpdateMessages(Vec<Message>),
    RescanTask(RescanTask),
}

struct MemoryTx {
    state: Arc<Mutex<RepositoryState>>,
    writes: Vec<Write>,
}

fn same_state(a: &AccountState, b: &AccountState) -> bool {
    a.address == b.address && a.last_tx_lt == b.last_tx_lt && a.block == b.block
}

fn upsert_states(target: &mut Vec<AccountState>, states: Vec<AccountState>) {
    for state in states {
        match target.iter_mut().find(|s| same_state(s, &state)) {
            Some(existing) => *existing = state,
            None => target.push(state),
        }
    }
}

#[async_trait]
impl RepositoryTx for MemoryTx {
    async fn add_blocks(&mut self, blocks: &[Block]) -> anyhow::Result<()> {
        self.writes.push(Write::Blocks(blocks.to_vec()));
        Ok(())
    }

    async fn add_account_states(&mut self, states: &[AccountState]) -> anyhow::Result<()> {
        self.writes.push(Write::AddAccountStates(states.to_vec()));
        Ok(())
    }

    async fn add_messages(&mut self, messages: &[Message]) -> anyhow::Result<()> {
        self.writes.push(Write::AddMessages(messages.to_vec()));
        Ok(())
    }

    async fn add_transactions(&mut self, transactions: &[Transaction]) -> anyhow::Result<()> {
        self.writes.push(Write::Transactions(transactions.to_vec()));
        Ok(())
    }

    async fn update_account_states(&mut self, states: &[AccountState]) -> anyhow::Result<()> {
        self.writes.push(Write::UpdateAccountStates(states.to_vec()));
        Ok(())
    }

    async fn update_messages(&mut self, messages: &[Message]) -> anyhow::Result<()> {
        self.writes.push(Write::UpdateMessages(messages.to_vec()));
        Ok(())
    }

    async fn set_rescan_task(&mut self, task: &RescanTask) -> anyhow::Result<()> {
        self.writes.push(Write::RescanTask(task.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTx { state, writes } = *self;
        let mut state = state.lock();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            anyhow::bail!("connection reset");
        }

        let mut masters = Vec::new();
        for write in writes {
            match write {
                Write::Blocks(blocks) => {
                    for block in blocks {
                        if block.is_masterchain() {
                            masters.push(block.id.seqno);
                        }
                        state.blocks.retain(|b| b.id != block.id);
                        state.blocks.push(block);
                    }
                }
                Write::AddAccountStates(states) | Write::UpdateAccountStates(states) => {
                    upsert_states(&mut state.account_states, states);
                }
                Write::AddMessages(messages) | Write::UpdateMessages(messages) => {
                    for message in messages {
                        state.messages.insert(message.hash, message);
                    }
                }
                Write::Transactions(transactions) => {
                    for tx in transactions {
                        state.transactions.retain(|t| t.hash != tx.hash);
                        state.transactions.push(tx);
                    }
                }
                Write::RescanTask(task) => {
                    state.rescan_tasks.insert(task.id, task);
                }
            }
        }

        if !masters.is_empty() {
            state.commits.push(masters);
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self) -> anyhow::Result<Box<dyn RepositoryTx>> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            writes: Vec::new(),
        }))
    }

    async fn get_first_master_block(&self) -> anyhow::Result<Option<Block>> {
        let state = self.state.lock();
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.is_masterchain())
            .min_by_key(|b| b.id.seqno)
            .cloned())
    }

    async fn get_last_master_block(&self) -> anyhow::Result<Option<Block>> {
        let state = self.state.lock();
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.is_masterchain())
            .max_by_key(|b| b.id.seqno)
            .cloned())
    }

    async fn get_all_account_states(
        &self,
        address: &StdAddr,
        before_lt: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<AccountState>> {
        let state = self.state.lock();
        let mut states = state
            .account_states
            .iter()
            .filter(|s| &s.address == address && s.last_tx_lt < before_lt)
            .cloned()
            .collect::<Vec<_>>();
        states.sort_by(|a, b| b.last_tx_lt.cmp(&a.last_tx_lt));
        states.truncate(limit);
        Ok(states)
    }

    async fn find_message_source(&self, hash: &HashBytes) -> anyhow::Result<Option<MessageSource>> {
        let state = self.state.lock();
        let Some(tx) = state
            .transactions
            .iter()
            .find(|tx| tx.out_msg_hashes.contains(hash))
        else {
            return Ok(None);
        };

        let contract = state
            .account_states
            .iter()
            .filter(|s| s.address == tx.address && s.last_tx_lt >= tx.lt)
            .min_by_key(|s| s.last_tx_lt)
            .and_then(|s| s.types.first().cloned());

        Ok(Some(MessageSource {
            tx: tx.tx_ref(),
            contract,
        }))
    }

    async fn get_unfinished_rescan_task(&self) -> anyhow::Result<Option<RescanTask>> {
        let state = self.state.lock();
        Ok(state.rescan_tasks.values().find(|t| !t.finished).cloned())
    }

    async fn get_contract_interface(&self, name: &str) -> anyhow::Result<Option<ContractInterface>> {
        Ok(self.state.lock().interfaces.get(name).cloned())
    }

    async fn get_contract_operation(
        &self,
        contract: &str,
        outgoing: bool,
        operation_id: u32,
    ) -> anyhow::Result<Option<ContractOperation>> {
        let state = self.state.lock();
        Ok(state
            .operations
            .iter()
            .find(|op| {
                op.contract_name == contract
                    && op.outgoing == outgoing
                    && op.operation_id == operation_id
            })
            .cloned())
    }

    async fn get_account_states_in_range(
        &self,
        filter: &AccountStateFilter,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<AccountState>> {
        let state = self.state.lock();
        let mut states = state
            .account_states
            .iter()
            .filter(|s| masters.contains(&s.master_seqno) && filter.matches(s))
            .cloned()
            .collect::<Vec<_>>();
        states.sort_by_key(|s| s.last_tx_lt);
        Ok(states)
    }

    async fn get_messages_in_range(
        &self,
        filter: &MessageFilter,
        masters: RangeInclusive<u32>,
    ) -> anyhow::Result<Vec<Message>> {
        let state = self.state.lock();
        let mut messages = state
            .messages
            .values()
            .filter(|m| {
                m.master_seqno().is_some_and(|seqno| masters.contains(&seqno)) && filter.matches(m)
            })
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by_key(|m| m.created_lt);
        Ok(messages)
    }
}
