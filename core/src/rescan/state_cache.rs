use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use tycho_types::models::StdAddr;
use tvm_indexer_util::FastHasherState;

use crate::chain::{AccountLookup, Repository};
use crate::models::AccountState;

/// Answers "what was the state of the address just before LT" from a
/// bounded per-address window of committed snapshots.
pub struct PointInTimeStateCache {
    repo: Arc<dyn Repository>,
    depth: usize,
    histories: moka::sync::Cache<StdAddr, Arc<AddressHistory>, FastHasherState>,
}

struct AddressHistory {
    /// Sorted by `last_tx_lt` in ascending order.
    states: Vec<AccountState>,
    /// Every loaded state has `last_tx_lt < loaded_before`.
    loaded_before: u64,
    /// Whether there are no older states than the loaded ones.
    exhaustive: bool,
}

impl AddressHistory {
    fn covers(&self, before_lt: u64) -> bool {
        if before_lt > self.loaded_before {
            return false;
        }
        self.exhaustive
            || matches!(self.states.first(), Some(oldest) if oldest.last_tx_lt < before_lt)
    }

    fn find(&self, before_lt: u64) -> Option<&AccountState> {
        self.states.iter().rev().find(|s| s.last_tx_lt < before_lt)
    }
}

impl PointInTimeStateCache {
    pub fn new(repo: Arc<dyn Repository>, addresses: NonZeroUsize, depth: usize) -> Self {
        Self {
            repo,
            depth: depth.max(1),
            histories: moka::sync::Cache::builder()
                .max_capacity(addresses.get() as u64)
                .build_with_hasher(Default::default()),
        }
    }

    /// Returns the latest state of the address with `last_tx_lt < before_lt`.
    pub async fn get_before(
        &self,
        address: &StdAddr,
        before_lt: u64,
    ) -> anyhow::Result<Option<AccountState>> {
        if let Some(history) = self.histories.get(address) {
            if history.covers(before_lt) {
                metrics::counter!("indexer_state_cache_hits").increment(1);
                return Ok(history.find(before_lt).cloned());
            }
        }
        metrics::counter!("indexer_state_cache_misses").increment(1);

        let mut states = self
            .repo
            .get_all_account_states(address, before_lt, self.depth)
            .await?;
        states.reverse();

        let history = AddressHistory {
            exhaustive: states.len() < self.depth,
            states,
            loaded_before: before_lt,
        };
        let state = history.find(before_lt).cloned();

        self.histories.insert(address.clone(), Arc::new(history));
        Ok(state)
    }

    /// Drops the loaded history of the address.
    pub fn invalidate(&self, address: &StdAddr) {
        self.histories.invalidate(address);
    }

    pub fn clear(&self) {
        self.histories.invalidate_all();
    }

    pub fn len(&self) -> usize {
        self.histories.run_pending_tasks();
        self.histories.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountLookup for PointInTimeStateCache {
    async fn get_account_state(
        &self,
        address: &StdAddr,
        before_lt: u64,
    ) -> anyhow::Result<Option<AccountState>> {
        self.get_before(address, before_lt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RepositoryTx;
    use crate::testing::{MemoryRepository, account_state, std_addr};

    async fn repo_with_states(lts: &[u64]) -> anyhow::Result<MemoryRepository> {
        let repo = MemoryRepository::default();
        let states = lts
            .iter()
            .map(|lt| account_state(std_addr(0, 1), *lt))
            .collect::<Vec<_>>();

        let mut tx = repo.begin().await?;
        tx.add_account_states(&states).await?;
        tx.commit().await?;
        Ok(repo)
    }

    #[tokio::test]
    async fn serves_older_points_from_cache() -> anyhow::Result<()> {
        let repo = repo_with_states(&[10, 20, 30, 40]).await?;
        let cache = PointInTimeStateCache::new(Arc::new(repo), NonZeroUsize::new(8).unwrap(), 2);
        let addr = std_addr(0, 1);

        // Loads 30 and 40
        let state = cache.get_before(&addr, 45).await?.unwrap();
        assert_eq!(state.last_tx_lt, 40);

        let state = cache.get_before(&addr, 35).await?.unwrap();
        assert_eq!(state.last_tx_lt, 30);

        // Not covered by the window, reloads 10 and 20
        let state = cache.get_before(&addr, 25).await?.unwrap();
        assert_eq!(state.last_tx_lt, 20);

        assert!(cache.get_before(&addr, 15).await?.is_some());
        assert!(cache.get_before(&addr, 10).await?.is_none());
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reloads_newer_points() -> anyhow::Result<()> {
        let repo = repo_with_states(&[10, 20]).await?;
        let cache =
            PointInTimeStateCache::new(Arc::new(repo.clone()), NonZeroUsize::new(8).unwrap(), 4);
        let addr = std_addr(0, 1);

        assert_eq!(cache.get_before(&addr, 25).await?.unwrap().last_tx_lt, 20);

        let mut tx = repo.begin().await?;
        tx.add_account_states(&[account_state(addr.clone(), 30)]).await?;
        tx.commit().await?;

        assert_eq!(cache.get_before(&addr, 25).await?.unwrap().last_tx_lt, 20);
        assert_eq!(cache.get_before(&addr, 35).await?.unwrap().last_tx_lt, 30);
        Ok(())
    }
}
