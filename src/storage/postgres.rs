//! PostgreSQL implementation of the game store.
//!
//! All mutations run inside a `sqlx` transaction owned by
//! `PostgresGameTransaction`; capacity arithmetic is done in SQL so the
//! row-level locks taken by `UPDATE` serialize concurrent assignments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use super::schema::{AccountGameData, GameShards};
use super::{AccountBinding, GameStore, GameTransaction, Result, ShardRecord, StorageError};

const SHARD_COLUMNS: &str =
    "shard_id, name, max_players, current_players, is_admin_enabled, is_system_active";

/// PostgreSQL-backed game store.
pub struct PostgresGameStore {
    pool: PgPool,
}

impl PostgresGameStore {
    /// Connect to the database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        info!(max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Transaction(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl GameStore for PostgresGameStore {
    async fn begin(&self) -> Result<Box<dyn GameTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresGameTransaction { tx }))
    }
}

/// One open Postgres transaction.
pub struct PostgresGameTransaction {
    tx: Transaction<'static, Postgres>,
}

fn shard_from_row(row: &PgRow) -> ShardRecord {
    ShardRecord {
        shard_id: row.get("shard_id"),
        name: row.get("name"),
        max_players: row.get("max_players"),
        current_players: row.get("current_players"),
        is_admin_enabled: row.get("is_admin_enabled"),
        is_system_active: row.get("is_system_active"),
    }
}

fn binding_from_row(row: &PgRow) -> AccountBinding {
    AccountBinding {
        account_id: row.get("account_id"),
        shard_id: row.get("shard_id"),
        last_login_game: row.get("last_login_game"),
    }
}

#[async_trait]
impl GameTransaction for PostgresGameTransaction {
    async fn list_open_shards(&mut self) -> Result<Vec<ShardRecord>> {
        let (sql, values) = Query::select()
            .columns([
                GameShards::ShardId,
                GameShards::Name,
                GameShards::MaxPlayers,
                GameShards::CurrentPlayers,
                GameShards::IsAdminEnabled,
                GameShards::IsSystemActive,
            ])
            .from(GameShards::Table)
            .and_where(Expr::col(GameShards::IsSystemActive).eq(true))
            .and_where(
                Expr::col(GameShards::CurrentPlayers).lt(Expr::col(GameShards::MaxPlayers)),
            )
            .order_by(GameShards::CurrentPlayers, Order::Asc)
            .order_by(GameShards::ShardId, Order::Asc)
            .build_sqlx(PostgresQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows.iter().map(shard_from_row).collect())
    }

    async fn get_shard(&mut self, shard_id: i64) -> Result<Option<ShardRecord>> {
        let sql = format!("SELECT {} FROM game_shards WHERE shard_id = $1", SHARD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(shard_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.as_ref().map(shard_from_row))
    }

    async fn create_shard(
        &mut self,
        shard_id: i64,
        name: &str,
        max_players: i32,
    ) -> Result<ShardRecord> {
        let sql = format!(
            "INSERT INTO game_shards (shard_id, name, max_players, current_players, \
             is_admin_enabled, is_system_active) \
             VALUES ($1, $2, $3, 0, FALSE, FALSE) RETURNING {}",
            SHARD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(shard_id)
            .bind(name)
            .bind(max_players)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(shard_from_row(&row))
    }

    async fn set_shard_flags(
        &mut self,
        shard_id: i64,
        is_admin_enabled: bool,
        is_system_active: bool,
    ) -> Result<()> {
        let (sql, values) = Query::update()
            .table(GameShards::Table)
            .values([
                (GameShards::IsAdminEnabled, is_admin_enabled.into()),
                (GameShards::IsSystemActive, is_system_active.into()),
            ])
            .and_where(Expr::col(GameShards::ShardId).eq(shard_id))
            .build_sqlx(PostgresQueryBuilder);

        let result = sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ShardNotFound(shard_id));
        }
        Ok(())
    }

    async fn increment_current_players(&mut self, shard_id: i64) -> Result<ShardRecord> {
        let sql = format!(
            "UPDATE game_shards SET current_players = current_players + 1 \
             WHERE shard_id = $1 RETURNING {}",
            SHARD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(shard_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StorageError::ShardNotFound(shard_id))?;

        Ok(shard_from_row(&row))
    }

    async fn decrement_current_players(&mut self, shard_id: i64, by: i32) -> Result<()> {
        // Clamp at zero; the counter must never go negative.
        sqlx::query(
            "UPDATE game_shards SET current_players = GREATEST(current_players - $2, 0) \
             WHERE shard_id = $1",
        )
        .bind(shard_id)
        .bind(by)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn account_binding(&mut self, account_id: i64) -> Result<Option<AccountBinding>> {
        let row = sqlx::query(
            "SELECT account_id, shard_id, last_login_game FROM account_game_data \
             WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.as_ref().map(binding_from_row))
    }

    async fn bind_account_to_shard(&mut self, account_id: i64, shard_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO account_game_data (account_id, shard_id, last_login_game) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (account_id) DO UPDATE \
             SET shard_id = EXCLUDED.shard_id, last_login_game = EXCLUDED.last_login_game",
        )
        .bind(account_id)
        .bind(shard_id)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn inactive_bound_accounts(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AccountBinding>> {
        let (sql, values) = Query::select()
            .columns([
                AccountGameData::AccountId,
                AccountGameData::ShardId,
                AccountGameData::LastLoginGame,
            ])
            .from(AccountGameData::Table)
            .and_where(Expr::col(AccountGameData::ShardId).is_not_null())
            .and_where(Expr::col(AccountGameData::LastLoginGame).lt(cutoff))
            .build_sqlx(PostgresQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows.iter().map(binding_from_row).collect())
    }

    async fn clear_shard_bindings(&mut self, account_ids: &[i64]) -> Result<u64> {
        if account_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE account_game_data SET shard_id = NULL WHERE account_id = ANY($1)",
        )
        .bind(account_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
