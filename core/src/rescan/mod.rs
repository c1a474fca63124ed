use std::num::{NonZeroU32, NonZeroUsize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tvm_indexer_util::metrics::HistogramGuard;
use tvm_indexer_util::serde_helpers;

pub use self::state_cache::PointInTimeStateCache;
use crate::chain::{ParseError, Parser, Repository};
use crate::models::{AccountData, AccountState, RescanTask};

mod accounts;
mod messages;
mod state_cache;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RescanConfig {
    /// Whether rescan tasks are processed by this instance.
    ///
    /// Default: `true`.
    pub enabled: bool,

    /// Delay between polls when there is no unfinished task.
    ///
    /// Default: 1 second.
    #[serde(with = "serde_helpers::humantime")]
    pub poll_interval: Duration,

    /// Number of master blocks processed by a single step.
    ///
    /// Default: `None` (the number of fetch workers).
    pub batch_masters: Option<NonZeroU32>,

    /// Max number of addresses with cached state history.
    ///
    /// Default: 4096.
    pub state_cache_addresses: NonZeroUsize,

    /// Max number of cached states per address.
    ///
    /// Default: 32.
    pub state_cache_depth: usize,
}

const DEFAULT_STATE_CACHE_ADDRESSES: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

impl Default for RescanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(1),
            batch_masters: None,
            state_cache_addresses: DEFAULT_STATE_CACHE_ADDRESSES,
            state_cache_depth: 32,
        }
    }
}

/// Applies rescan tasks one window of master blocks at a time.
///
/// Only a single unfinished task is processed. Accounts are rescanned
/// first, messages only after the account checkpoint reaches the last
/// indexed master block.
pub struct RescanScheduler {
    repo: Arc<dyn Repository>,
    parser: Arc<dyn Parser>,
    batch_masters: u32,
    states: PointInTimeStateCache,
}

impl RescanScheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        parser: Arc<dyn Parser>,
        config: &RescanConfig,
        batch_masters: u32,
    ) -> Self {
        let states = PointInTimeStateCache::new(
            repo.clone(),
            config.state_cache_addresses,
            config.state_cache_depth,
        );

        Self {
            repo,
            parser,
            batch_masters: batch_masters.max(1),
            states,
        }
    }

    pub async fn run(self, poll_interval: Duration, cancel: CancellationToken) {
        tracing::info!("started rescan scheduler");

        while !cancel.is_cancelled() {
            let idle = match self.step().await {
                Ok(Some(task)) => {
                    if task.finished {
                        tracing::info!(id = task.id, contract = %task.contract_name, "rescan task finished");
                    }
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    metrics::counter!("indexer_rescan_errors").increment(1);
                    tracing::error!("rescan step failed: {e:?}");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        tracing::info!("rescan scheduler stopped");
    }

    /// Processes the next window of the unfinished task.
    ///
    /// Returns the updated task or `None` if there was nothing to do.
    pub async fn step(&self) -> anyhow::Result<Option<RescanTask>> {
        let Some(mut task) = self.repo.get_unfinished_rescan_task().await? else {
            return Ok(None);
        };
        let (Some(first), Some(last)) = (
            self.repo.get_first_master_block().await?,
            self.repo.get_last_master_block().await?,
        ) else {
            return Ok(None);
        };
        let (first, last) = (first.id.seqno, last.id.seqno);

        let _histogram = HistogramGuard::begin("indexer_rescan_step_time");

        if !task.task_type.rescans_accounts() {
            task.accounts_rescan_done = true;
        }
        if !task.task_type.rescans_messages() {
            task.messages_rescan_done = true;
        }

        let mut accounts = Vec::new();
        let mut messages = Vec::new();

        if !task.accounts_rescan_done {
            match self.next_window(task.accounts_last_master, first, last) {
                Some(masters) => {
                    tracing::debug!(
                        id = task.id,
                        from = masters.start(),
                        to = masters.end(),
                        "rescanning accounts"
                    );
                    accounts = self.rescan_accounts(&task, masters.clone()).await?;
                    task.accounts_last_master = Some(*masters.end());
                    task.accounts_rescan_done = *masters.end() >= last;
                }
                None => task.accounts_rescan_done = true,
            }
        } else if !task.messages_rescan_done {
            match self.next_window(task.messages_last_master, first, last) {
                Some(masters) => {
                    tracing::debug!(
                        id = task.id,
                        from = masters.start(),
                        to = masters.end(),
                        "rescanning messages"
                    );
                    messages = self.rescan_messages(&task, masters.clone()).await?;
                    task.messages_last_master = Some(*masters.end());
                    task.messages_rescan_done = *masters.end() >= last;
                }
                None => task.messages_rescan_done = true,
            }
        }

        task.finished = task.accounts_rescan_done && task.messages_rescan_done;
        task.updated_at = tvm_indexer_util::time::now_sec();

        let mut tx = self.repo.begin().await?;
        if !accounts.is_empty() {
            tx.update_account_states(&accounts).await?;
        }
        if !messages.is_empty() {
            tx.update_messages(&messages).await?;
        }
        tx.set_rescan_task(&task).await?;
        tx.commit().await?;

        for state in &accounts {
            self.states.invalidate(&state.address);
        }
        if task.finished {
            self.states.clear();
        }

        metrics::counter!("indexer_rescan_updated_accounts").increment(accounts.len() as u64);
        metrics::counter!("indexer_rescan_updated_messages").increment(messages.len() as u64);
        tracing::info!(
            id = task.id,
            task_type = ?task.task_type,
            contract = %task.contract_name,
            state = ?task.state(),
            accounts_last_master = ?task.accounts_last_master,
            messages_last_master = ?task.messages_last_master,
            updated_accounts = accounts.len(),
            updated_messages = messages.len(),
            "rescan step completed"
        );

        Ok(Some(task))
    }

    fn next_window(
        &self,
        checkpoint: Option<u32>,
        first: u32,
        last: u32,
    ) -> Option<RangeInclusive<u32>> {
        let from = match checkpoint {
            Some(checkpoint) if checkpoint >= first => checkpoint.checked_add(1)?,
            _ => first,
        };
        if from > last {
            return None;
        }

        let to = from.saturating_add(self.batch_masters - 1).min(last);
        Some(from..=to)
    }
}

/// Applies the parser output to the state, recording unparsable data.
fn apply_parsed(
    state: &mut AccountState,
    parsed: Result<AccountData, ParseError>,
) -> anyhow::Result<()> {
    match parsed {
        Ok(data) => state.apply_data(data),
        Err(ParseError::NotAvailable) => {}
        Err(ParseError::ImpossibleParsing(reason)) => state.error = Some(reason),
        Err(ParseError::Other(e)) => return Err(e),
    }
    Ok(())
}
