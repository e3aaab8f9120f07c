//! Shard directory and assignment engine.
//!
//! Decides which shard an account is bound to, enforcing capacity and
//! recovering slots from inactive accounts. This is the system's admission
//! controller: it never blocks waiting for capacity and never silently
//! drops a request; when every shard is full it degrades to an operator
//! alert and a failure result.
//!
//! All shard/binding mutation happens inside one `GameTransaction`; the
//! transaction is the only serialization point, so two concurrent
//! assignments cannot both take the last slot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bus::{MessageBus, ADMIN_NOTIFICATION_ROUTING_KEY, EVENTS_EXCHANGE};
use crate::envelope::AdminNotification;
use crate::storage::{
    with_transaction, GameStore, GameTransaction, ShardRecord, StorageError,
};

/// Notification reason emitted when no capacity can be found.
pub const SHARDS_FULL: &str = "SHARDS_FULL";

/// Accounts idle longer than this lose their shard binding to reclamation.
pub const INACTIVITY_THRESHOLD_HOURS: i64 = 24;

/// Errors from the assignment engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of one assignment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The account is bound to `shard_id`. `newly_assigned` is false when
    /// an existing binding short-circuited the search.
    Assigned { shard_id: i64, newly_assigned: bool },
    /// Every shard is full, even after reclamation.
    NoCapacity,
}

/// Slots recovered by one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub total_cleaned: u64,
    /// Slots freed per shard id.
    pub shards_impacted: HashMap<i64, i64>,
}

/// The shard assignment engine.
pub struct ShardDirectory {
    store: Arc<dyn GameStore>,
    bus: Arc<dyn MessageBus>,
    inactivity_threshold: Duration,
}

impl ShardDirectory {
    pub fn new(store: Arc<dyn GameStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            bus,
            inactivity_threshold: Duration::hours(INACTIVITY_THRESHOLD_HOURS),
        }
    }

    /// Override the reclamation threshold (tests, operator tuning).
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// The shard a new login would currently land on, if any.
    pub async fn find_best_shard(&self) -> Result<Option<ShardRecord>> {
        with_transaction(self.store.as_ref(), |tx| {
            Box::pin(async move { Ok(best_shard(tx).await?) })
        })
        .await
    }

    /// Bind `account_id` to a shard, reclaiming capacity if needed.
    ///
    /// Runs as one transaction: existing-binding short-circuit, best-shard
    /// lookup, at most one reclamation pass, at most one retry. When no
    /// capacity remains, one `SHARDS_FULL` operator notification is
    /// published and the transaction still commits, so reclaimed slots
    /// survive the failed attempt.
    pub async fn assign(&self, account_id: i64) -> Result<AssignOutcome> {
        let bus = self.bus.clone();
        let cutoff = Utc::now() - self.inactivity_threshold;

        with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                if let Some(binding) = tx.account_binding(account_id).await? {
                    if let Some(shard_id) = binding.shard_id {
                        info!(account_id, shard_id, "Account already bound to shard");
                        tx.bind_account_to_shard(account_id, shard_id).await?;
                        return Ok(AssignOutcome::Assigned {
                            shard_id,
                            newly_assigned: false,
                        });
                    }
                }

                let mut best = best_shard(tx).await?;

                if best.is_none() {
                    warn!(account_id, "No open shard; running reclamation");
                    let report = reclaim_inactive(tx, cutoff).await?;
                    if report.total_cleaned > 0 {
                        info!(
                            freed = report.total_cleaned,
                            "Reclamation freed slots; retrying shard lookup"
                        );
                        best = best_shard(tx).await?;
                    }
                }

                match best {
                    Some(shard) => {
                        tx.increment_current_players(shard.shard_id).await?;
                        tx.bind_account_to_shard(account_id, shard.shard_id).await?;
                        info!(account_id, shard_id = shard.shard_id, "Account assigned to shard");
                        Ok(AssignOutcome::Assigned {
                            shard_id: shard.shard_id,
                            newly_assigned: true,
                        })
                    }
                    None => {
                        error!(account_id, "All shards full after reclamation");
                        notify_shards_full(bus.as_ref()).await;
                        Ok(AssignOutcome::NoCapacity)
                    }
                }
            })
        })
        .await
    }

    /// Operator-triggered reclamation pass in its own transaction.
    pub async fn cleanup_inactive_players(&self) -> Result<CleanupReport> {
        let cutoff = Utc::now() - self.inactivity_threshold;
        with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { Ok(reclaim_inactive(tx, cutoff).await?) })
        })
        .await
    }
}

/// Fewest-players shard with free capacity; ties go to the first
/// encountered (the store orders on load, then id).
async fn best_shard(
    tx: &mut dyn GameTransaction,
) -> std::result::Result<Option<ShardRecord>, StorageError> {
    Ok(tx.list_open_shards().await?.into_iter().next())
}

/// Clear bindings of accounts idle since before `cutoff` and hand the
/// slots back to their shards. Best-effort compaction: account rows are
/// untouched, only the binding goes away.
async fn reclaim_inactive(
    tx: &mut dyn GameTransaction,
    cutoff: DateTime<Utc>,
) -> std::result::Result<CleanupReport, StorageError> {
    let inactive = tx.inactive_bound_accounts(cutoff).await?;
    if inactive.is_empty() {
        info!("No inactive accounts to reclaim");
        return Ok(CleanupReport::default());
    }

    let mut shards_impacted: HashMap<i64, i64> = HashMap::new();
    let mut account_ids = Vec::with_capacity(inactive.len());
    for binding in &inactive {
        if let Some(shard_id) = binding.shard_id {
            *shards_impacted.entry(shard_id).or_default() += 1;
        }
        account_ids.push(binding.account_id);
    }

    tx.clear_shard_bindings(&account_ids).await?;

    for (shard_id, count) in &shards_impacted {
        tx.decrement_current_players(*shard_id, *count as i32).await?;
        info!(shard_id, freed = count, "Reclaimed shard slots");
    }

    let total_cleaned = account_ids.len() as u64;
    info!(total_cleaned, "Reclamation pass complete");

    Ok(CleanupReport {
        total_cleaned,
        shards_impacted,
    })
}

/// Fire-and-forget operator alert; publish failures are logged, never
/// propagated into the assignment outcome.
async fn notify_shards_full(bus: &dyn MessageBus) {
    let notification = AdminNotification::new(
        SHARDS_FULL,
        "All shards are full of active players; additional capacity is required.",
    );

    let body = match notification.encode() {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to encode admin notification");
            return;
        }
    };

    if let Err(e) = bus
        .publish(EVENTS_EXCHANGE, ADMIN_NOTIFICATION_ROUTING_KEY, body)
        .await
    {
        error!(error = %e, "Failed to publish admin notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::storage::MockGameStore;

    fn engine(store: Arc<MockGameStore>, bus: Arc<MockMessageBus>) -> ShardDirectory {
        ShardDirectory::new(store, bus)
    }

    #[tokio::test]
    async fn best_shard_over_empty_set_is_none() {
        let store = Arc::new(MockGameStore::new());
        let directory = engine(store, Arc::new(MockMessageBus::new()));

        assert!(directory.find_best_shard().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn best_shard_ignores_full_and_inactive() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "full", 5, 5, true).await;
        store.seed_shard(2, "dark", 5, 0, false).await;
        let directory = engine(store, Arc::new(MockMessageBus::new()));

        assert!(directory.find_best_shard().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn best_shard_prefers_fewest_players() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "busy", 10, 7, true).await;
        store.seed_shard(2, "quiet", 10, 2, true).await;
        let directory = engine(store, Arc::new(MockMessageBus::new()));

        let best = directory.find_best_shard().await.unwrap().unwrap();
        assert_eq!(best.shard_id, 2);
    }

    #[tokio::test]
    async fn assign_binds_and_increments() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 10, 0, true).await;
        let directory = engine(store.clone(), Arc::new(MockMessageBus::new()));

        let outcome = directory.assign(42).await.unwrap();
        assert_eq!(
            outcome,
            AssignOutcome::Assigned {
                shard_id: 1,
                newly_assigned: true
            }
        );
        assert_eq!(store.shard(1).await.unwrap().current_players, 1);
        assert_eq!(store.binding(42).await.unwrap().shard_id, Some(1));
    }

    #[tokio::test]
    async fn assign_short_circuits_on_existing_binding() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 10, 3, true).await;
        store.seed_binding(42, Some(1), Some(Utc::now())).await;
        let directory = engine(store.clone(), Arc::new(MockMessageBus::new()));

        let outcome = directory.assign(42).await.unwrap();
        assert_eq!(
            outcome,
            AssignOutcome::Assigned {
                shard_id: 1,
                newly_assigned: false
            }
        );
        // The existing binding must not consume another slot.
        assert_eq!(store.shard(1).await.unwrap().current_players, 3);
    }

    #[tokio::test]
    async fn capacity_exhaustion_notifies_admins_once() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 1, 1, true).await;
        store.seed_shard(2, "beta", 1, 1, true).await;
        let bus = Arc::new(MockMessageBus::new());
        let directory = engine(store.clone(), bus.clone());

        let outcome = directory.assign(42).await.unwrap();
        assert_eq!(outcome, AssignOutcome::NoCapacity);
        assert!(store.binding(42).await.is_none());

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, EVENTS_EXCHANGE);
        assert_eq!(published[0].routing_key, ADMIN_NOTIFICATION_ROUTING_KEY);

        let notification: AdminNotification =
            rmp_serde::from_slice(&published[0].body).unwrap();
        assert_eq!(notification.reason, SHARDS_FULL);
    }

    #[tokio::test]
    async fn reclamation_frees_slot_for_new_account() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 1, 1, true).await;
        let stale = Utc::now() - Duration::hours(48);
        store.seed_binding(7, Some(1), Some(stale)).await;
        let bus = Arc::new(MockMessageBus::new());
        let directory = engine(store.clone(), bus.clone());

        let outcome = directory.assign(42).await.unwrap();
        assert_eq!(
            outcome,
            AssignOutcome::Assigned {
                shard_id: 1,
                newly_assigned: true
            }
        );

        // The stale binding was cleared and the slot reused: still 1/1.
        assert_eq!(store.binding(7).await.unwrap().shard_id, None);
        assert_eq!(store.shard(1).await.unwrap().current_players, 1);
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn recently_active_accounts_survive_reclamation() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 1, 1, true).await;
        store.seed_binding(7, Some(1), Some(Utc::now())).await;
        let bus = Arc::new(MockMessageBus::new());
        let directory = engine(store.clone(), bus.clone());

        let outcome = directory.assign(42).await.unwrap();
        assert_eq!(outcome, AssignOutcome::NoCapacity);
        assert_eq!(store.binding(7).await.unwrap().shard_id, Some(1));
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_reports_per_shard_counts() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 10, 2, true).await;
        store.seed_shard(2, "beta", 10, 1, true).await;
        let stale = Utc::now() - Duration::hours(48);
        store.seed_binding(7, Some(1), Some(stale)).await;
        store.seed_binding(8, Some(1), Some(stale)).await;
        store.seed_binding(9, Some(2), Some(stale)).await;
        let directory = engine(store.clone(), Arc::new(MockMessageBus::new()));

        let report = directory.cleanup_inactive_players().await.unwrap();
        assert_eq!(report.total_cleaned, 3);
        assert_eq!(report.shards_impacted.get(&1), Some(&2));
        assert_eq!(report.shards_impacted.get(&2), Some(&1));
        assert_eq!(store.shard(1).await.unwrap().current_players, 0);
        assert_eq!(store.shard(2).await.unwrap().current_players, 0);
    }

    #[tokio::test]
    async fn concurrent_assigns_never_exceed_capacity() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 1, 0, true).await;
        store.seed_shard(2, "beta", 1, 0, true).await;
        let bus = Arc::new(MockMessageBus::new());
        let directory = Arc::new(engine(store.clone(), bus));

        let mut tasks = Vec::new();
        for account_id in 0..4 {
            let directory = directory.clone();
            tasks.push(tokio::spawn(
                async move { directory.assign(account_id).await },
            ));
        }

        let mut assigned = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                AssignOutcome::Assigned { .. } => assigned += 1,
                AssignOutcome::NoCapacity => {}
            }
        }

        // Total free capacity was 2; no overcommit.
        assert_eq!(assigned, 2);
        assert_eq!(store.shard(1).await.unwrap().current_players, 1);
        assert_eq!(store.shard(2).await.unwrap().current_players, 1);
    }
}
