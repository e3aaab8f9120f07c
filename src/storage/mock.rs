//! Mock game store for testing.
//!
//! State lives in memory; transactions take an owned lock on it, so two
//! transactions never interleave; the same serialization the database
//! gives capacity accounting. A transaction works on a snapshot that is
//! published on commit and discarded on rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{AccountBinding, GameStore, GameTransaction, Result, ShardRecord, StorageError};

#[derive(Default, Clone)]
struct State {
    shards: BTreeMap<i64, ShardRecord>,
    bindings: BTreeMap<i64, AccountBinding>,
}

/// In-memory game store.
#[derive(Default)]
pub struct MockGameStore {
    state: Arc<Mutex<State>>,
    fail_on_commit: RwLock<bool>,
}

impl MockGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    pub async fn seed_shard(
        &self,
        shard_id: i64,
        name: &str,
        max_players: i32,
        current_players: i32,
        is_system_active: bool,
    ) {
        self.state.lock().await.shards.insert(
            shard_id,
            ShardRecord {
                shard_id,
                name: name.to_string(),
                max_players,
                current_players,
                is_admin_enabled: true,
                is_system_active,
            },
        );
    }

    pub async fn seed_binding(
        &self,
        account_id: i64,
        shard_id: Option<i64>,
        last_login_game: Option<DateTime<Utc>>,
    ) {
        self.state.lock().await.bindings.insert(
            account_id,
            AccountBinding {
                account_id,
                shard_id,
                last_login_game,
            },
        );
    }

    /// Committed view of one shard.
    pub async fn shard(&self, shard_id: i64) -> Option<ShardRecord> {
        self.state.lock().await.shards.get(&shard_id).cloned()
    }

    /// Committed view of one account binding.
    pub async fn binding(&self, account_id: i64) -> Option<AccountBinding> {
        self.state.lock().await.bindings.get(&account_id).cloned()
    }
}

#[async_trait]
impl GameStore for MockGameStore {
    async fn begin(&self) -> Result<Box<dyn GameTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        let fail_on_commit = *self.fail_on_commit.read().await;
        Ok(Box::new(MockGameTransaction {
            guard,
            working,
            fail_on_commit,
        }))
    }
}

struct MockGameTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    fail_on_commit: bool,
}

#[async_trait]
impl GameTransaction for MockGameTransaction {
    async fn list_open_shards(&mut self) -> Result<Vec<ShardRecord>> {
        let mut open: Vec<ShardRecord> = self
            .working
            .shards
            .values()
            .filter(|s| s.is_system_active && s.has_capacity())
            .cloned()
            .collect();
        open.sort_by_key(|s| (s.current_players, s.shard_id));
        Ok(open)
    }

    async fn get_shard(&mut self, shard_id: i64) -> Result<Option<ShardRecord>> {
        Ok(self.working.shards.get(&shard_id).cloned())
    }

    async fn create_shard(
        &mut self,
        shard_id: i64,
        name: &str,
        max_players: i32,
    ) -> Result<ShardRecord> {
        let record = ShardRecord {
            shard_id,
            name: name.to_string(),
            max_players,
            current_players: 0,
            is_admin_enabled: false,
            is_system_active: false,
        };
        self.working.shards.insert(shard_id, record.clone());
        Ok(record)
    }

    async fn set_shard_flags(
        &mut self,
        shard_id: i64,
        is_admin_enabled: bool,
        is_system_active: bool,
    ) -> Result<()> {
        let shard = self
            .working
            .shards
            .get_mut(&shard_id)
            .ok_or(StorageError::ShardNotFound(shard_id))?;
        shard.is_admin_enabled = is_admin_enabled;
        shard.is_system_active = is_system_active;
        Ok(())
    }

    async fn increment_current_players(&mut self, shard_id: i64) -> Result<ShardRecord> {
        let shard = self
            .working
            .shards
            .get_mut(&shard_id)
            .ok_or(StorageError::ShardNotFound(shard_id))?;
        shard.current_players += 1;
        Ok(shard.clone())
    }

    async fn decrement_current_players(&mut self, shard_id: i64, by: i32) -> Result<()> {
        if let Some(shard) = self.working.shards.get_mut(&shard_id) {
            shard.current_players = (shard.current_players - by).max(0);
        }
        Ok(())
    }

    async fn account_binding(&mut self, account_id: i64) -> Result<Option<AccountBinding>> {
        Ok(self.working.bindings.get(&account_id).cloned())
    }

    async fn bind_account_to_shard(&mut self, account_id: i64, shard_id: i64) -> Result<()> {
        self.working.bindings.insert(
            account_id,
            AccountBinding {
                account_id,
                shard_id: Some(shard_id),
                last_login_game: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn inactive_bound_accounts(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccountBinding>> {
        Ok(self
            .working
            .bindings
            .values()
            .filter(|b| b.shard_id.is_some() && b.last_login_game.is_some_and(|t| t < cutoff))
            .cloned()
            .collect())
    }

    async fn clear_shard_bindings(&mut self, account_ids: &[i64]) -> Result<u64> {
        let mut cleared = 0;
        for account_id in account_ids {
            if let Some(binding) = self.working.bindings.get_mut(account_id) {
                if binding.shard_id.take().is_some() {
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.fail_on_commit {
            return Err(StorageError::Transaction("mock commit failure".to_string()));
        }
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
