//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Game shards table schema.
#[derive(Iden)]
pub enum GameShards {
    Table,
    #[iden = "shard_id"]
    ShardId,
    #[iden = "name"]
    Name,
    #[iden = "max_players"]
    MaxPlayers,
    #[iden = "current_players"]
    CurrentPlayers,
    #[iden = "is_admin_enabled"]
    IsAdminEnabled,
    #[iden = "is_system_active"]
    IsSystemActive,
}

/// Account game-data table schema (shard-binding columns).
#[derive(Iden)]
pub enum AccountGameData {
    Table,
    #[iden = "account_id"]
    AccountId,
    #[iden = "shard_id"]
    ShardId,
    #[iden = "last_login_game"]
    LastLoginGame,
}
