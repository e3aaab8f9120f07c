//! Relational storage boundary and transactional execution wrapper.
//!
//! This module contains:
//! - `GameStore` / `GameTransaction` traits: the session/transaction factory
//!   handlers are written against
//! - `with_transaction`: commit-on-success / rollback-on-error combinator
//! - Implementations: Postgres (sqlx), Mock
//!
//! Shard records and account bindings are mutated only inside a
//! `GameTransaction`; that transaction is the single serialization point for
//! capacity accounting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{error, warn};

pub mod mock;
pub mod postgres;
pub mod schema;

pub use mock::MockGameStore;
pub use postgres::PostgresGameStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Shard {0} not found")]
    ShardNotFound(i64),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

// ============================================================================
// Records
// ============================================================================

/// One game-world instance with bounded player capacity.
///
/// `shard_id` is the stable external identity (bound to a guild id at
/// creation). Rows are created administratively and deactivated rather than
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRecord {
    pub shard_id: i64,
    pub name: String,
    pub max_players: i32,
    pub current_players: i32,
    /// Operator kill-switch.
    pub is_admin_enabled: bool,
    /// Automatic health flag; inactive shards never receive assignments.
    pub is_system_active: bool,
}

impl ShardRecord {
    /// Whether the shard can take one more player.
    pub fn has_capacity(&self) -> bool {
        self.current_players < self.max_players
    }
}

/// The shard-binding slice of an account's game data.
///
/// An account is bound to at most one shard at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBinding {
    pub account_id: i64,
    pub shard_id: Option<i64>,
    pub last_login_game: Option<DateTime<Utc>>,
}

// ============================================================================
// Traits
// ============================================================================

/// Session/transaction factory. The only capability the engine requires of
/// the database.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn GameTransaction>>;
}

/// One open database transaction over shard records and account bindings.
///
/// All reads and mutations observe the transaction's own uncommitted state.
/// Nested reuse is not supported; flows that span multiple steps pass the
/// same handle through all of them.
#[async_trait]
pub trait GameTransaction: Send {
    /// Shards eligible for assignment: `is_system_active` and below
    /// capacity, ordered fewest `current_players` first (stable on id).
    async fn list_open_shards(&mut self) -> Result<Vec<ShardRecord>>;

    async fn get_shard(&mut self, shard_id: i64) -> Result<Option<ShardRecord>>;

    /// Administrative creation; `shard_id` is the external identity.
    async fn create_shard(
        &mut self,
        shard_id: i64,
        name: &str,
        max_players: i32,
    ) -> Result<ShardRecord>;

    /// Flip the operator and health flags.
    async fn set_shard_flags(
        &mut self,
        shard_id: i64,
        is_admin_enabled: bool,
        is_system_active: bool,
    ) -> Result<()>;

    /// Add one player to the shard's count. Errors if the shard is unknown.
    async fn increment_current_players(&mut self, shard_id: i64) -> Result<ShardRecord>;

    /// Remove up to `by` players from the shard's count, clamped at zero.
    async fn decrement_current_players(&mut self, shard_id: i64, by: i32) -> Result<()>;

    async fn account_binding(&mut self, account_id: i64) -> Result<Option<AccountBinding>>;

    /// Bind the account to a shard and refresh `last_login_game`.
    async fn bind_account_to_shard(&mut self, account_id: i64, shard_id: i64) -> Result<()>;

    /// Accounts still holding a shard binding whose `last_login_game` is
    /// older than `cutoff`.
    async fn inactive_bound_accounts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<AccountBinding>>;

    /// Clear the shard binding for the given accounts. Account rows survive;
    /// only the binding is removed.
    async fn clear_shard_bindings(&mut self, account_ids: &[i64]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

// ============================================================================
// Transactional execution wrapper
// ============================================================================

/// Run `work` inside one transaction: commit on `Ok`, roll back and re-raise
/// on `Err`.
///
/// The unit of work receives the open transaction handle as an explicit
/// argument; only one operation owns it at a time.
pub async fn with_transaction<T, E, F>(store: &dyn GameStore, work: F) -> std::result::Result<T, E>
where
    E: From<StorageError> + std::fmt::Display,
    F: for<'a> FnOnce(&'a mut dyn GameTransaction) -> BoxFuture<'a, std::result::Result<T, E>>
        + Send,
{
    let mut tx = store.begin().await.map_err(E::from)?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(E::from)?;
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "Rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_on_success() {
        let store = MockGameStore::new();
        store.seed_shard(1, "alpha", 10, 0, true).await;

        let result: std::result::Result<(), StorageError> =
            with_transaction(&store, |tx| {
                Box::pin(async move {
                    tx.increment_current_players(1).await?;
                    Ok(())
                })
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(store.shard(1).await.unwrap().current_players, 1);
    }

    #[tokio::test]
    async fn rolls_back_on_error() {
        let store = MockGameStore::new();
        store.seed_shard(1, "alpha", 10, 0, true).await;

        let result: std::result::Result<(), StorageError> =
            with_transaction(&store, |tx| {
                Box::pin(async move {
                    tx.increment_current_players(1).await?;
                    Err(StorageError::Transaction("forced".to_string()))
                })
            })
            .await;

        assert!(result.is_err());
        // The increment never became visible.
        assert_eq!(store.shard(1).await.unwrap().current_players, 0);
    }

    #[tokio::test]
    async fn commit_failure_surfaces_as_error() {
        let store = MockGameStore::new();
        store.seed_shard(1, "alpha", 10, 0, true).await;
        store.set_fail_on_commit(true).await;

        let result: std::result::Result<(), StorageError> =
            with_transaction(&store, |tx| {
                Box::pin(async move {
                    tx.increment_current_players(1).await?;
                    Ok(())
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.shard(1).await.unwrap().current_players, 0);
    }
}
