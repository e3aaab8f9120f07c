//! Operator-triggered reclamation handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{cleanup_error, CommandHandler, HandlerError, HandlerReply};
use crate::envelope::CommandEnvelope;
use crate::shard::ShardDirectory;

pub const CLEANUP_INACTIVE_PLAYERS: &str = "cleanup_inactive_players";

/// Runs one reclamation pass over inactive shard bindings.
pub struct CleanupInactivePlayersHandler {
    directory: Arc<ShardDirectory>,
}

impl CleanupInactivePlayersHandler {
    pub fn new(directory: Arc<ShardDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl CommandHandler for CleanupInactivePlayersHandler {
    fn command(&self) -> &'static str {
        CLEANUP_INACTIVE_PLAYERS
    }

    fn domain(&self) -> &'static str {
        "auth"
    }

    fn action(&self) -> &'static str {
        CLEANUP_INACTIVE_PLAYERS
    }

    async fn handle(&self, _cmd: &CommandEnvelope) -> Result<HandlerReply, HandlerError> {
        let report = self
            .directory
            .cleanup_inactive_players()
            .await
            .map_err(cleanup_error)?;

        Ok(
            HandlerReply::new(format!("Cleared {} inactive bindings", report.total_cleaned))
                .with_data(json!({
                    "total_cleaned": report.total_cleaned,
                    "shards_impacted": report.shards_impacted,
                })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::storage::MockGameStore;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn reports_freed_slots() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(1, "alpha", 10, 2, true).await;
        let stale = Utc::now() - Duration::hours(48);
        store.seed_binding(7, Some(1), Some(stale)).await;

        let directory = Arc::new(ShardDirectory::new(
            store.clone(),
            Arc::new(MockMessageBus::new()),
        ));
        let handler = CleanupInactivePlayersHandler::new(directory);

        let cmd = CommandEnvelope::new(CLEANUP_INACTIVE_PLAYERS, serde_json::json!({}));
        let reply = handler.handle(&cmd).await.unwrap();
        assert_eq!(reply.data.unwrap()["total_cleaned"], 1);
        assert_eq!(store.shard(1).await.unwrap().current_players, 1);
    }
}
