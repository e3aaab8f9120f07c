//! Shard assignment handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{decode_payload, CommandHandler, HandlerError, HandlerReply};
use crate::envelope::{CommandEnvelope, SHARD_ASSIGNMENT_FAILED_NO_SPACE};
use crate::shard::{AssignOutcome, ShardDirectory};

pub const ASSIGN_ACCOUNT_TO_SHARD: &str = "assign_account_to_shard";

#[derive(Debug, Deserialize)]
struct AssignShardPayload {
    account_id: i64,
}

/// Binds an account to the best available shard.
pub struct AssignShardHandler {
    directory: Arc<ShardDirectory>,
}

impl AssignShardHandler {
    pub fn new(directory: Arc<ShardDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl CommandHandler for AssignShardHandler {
    fn command(&self) -> &'static str {
        ASSIGN_ACCOUNT_TO_SHARD
    }

    fn domain(&self) -> &'static str {
        "auth"
    }

    fn action(&self) -> &'static str {
        ASSIGN_ACCOUNT_TO_SHARD
    }

    async fn handle(&self, cmd: &CommandEnvelope) -> Result<HandlerReply, HandlerError> {
        let payload: AssignShardPayload = decode_payload(cmd)?;

        match self.directory.assign(payload.account_id).await? {
            AssignOutcome::Assigned {
                shard_id,
                newly_assigned,
            } => Ok(HandlerReply::new(format!("Account assigned to shard {}", shard_id))
                .with_data(json!({
                    "account_id": payload.account_id,
                    "shard_id": shard_id,
                    "newly_assigned": newly_assigned,
                }))),
            AssignOutcome::NoCapacity => Err(HandlerError::business(
                SHARD_ASSIGNMENT_FAILED_NO_SPACE,
                "No free shard available, even after reclamation",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::storage::MockGameStore;

    fn handler(store: Arc<MockGameStore>) -> AssignShardHandler {
        let directory = Arc::new(ShardDirectory::new(store, Arc::new(MockMessageBus::new())));
        AssignShardHandler::new(directory)
    }

    #[tokio::test]
    async fn returns_assignment_data() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(5, "alpha", 10, 0, true).await;

        let cmd = CommandEnvelope::new(
            ASSIGN_ACCOUNT_TO_SHARD,
            serde_json::json!({"account_id": 42}),
        );
        let reply = handler(store).handle(&cmd).await.unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data["shard_id"], 5);
        assert_eq!(data["newly_assigned"], true);
    }

    #[tokio::test]
    async fn exhaustion_maps_to_business_error() {
        let store = Arc::new(MockGameStore::new());
        store.seed_shard(5, "alpha", 1, 1, true).await;

        let cmd = CommandEnvelope::new(
            ASSIGN_ACCOUNT_TO_SHARD,
            serde_json::json!({"account_id": 42}),
        );
        let err = handler(store).handle(&cmd).await.unwrap_err();
        assert_eq!(err.to_detail().code, SHARD_ASSIGNMENT_FAILED_NO_SPACE);
    }
}
