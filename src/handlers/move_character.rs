//! Character movement handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{decode_payload, CommandHandler, HandlerError, HandlerReply};
use crate::envelope::CommandEnvelope;
use crate::presence::PresenceManager;

pub const MOVE_CHARACTER_TO_LOCATION: &str = "move_character_to_location";

#[derive(Debug, Deserialize)]
struct MoveCharacterPayload {
    character_id: i64,
    #[serde(default)]
    old_location_id: Option<String>,
    new_location_id: String,
}

/// Moves a character between locations and reports the destination state.
///
/// The move itself always succeeds; the returned summary is best-effort
/// (zero-valued when the destination could not be summarized).
pub struct MoveCharacterHandler {
    presence: Arc<PresenceManager>,
}

impl MoveCharacterHandler {
    pub fn new(presence: Arc<PresenceManager>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl CommandHandler for MoveCharacterHandler {
    fn command(&self) -> &'static str {
        MOVE_CHARACTER_TO_LOCATION
    }

    fn domain(&self) -> &'static str {
        "game"
    }

    fn action(&self) -> &'static str {
        MOVE_CHARACTER_TO_LOCATION
    }

    async fn handle(&self, cmd: &CommandEnvelope) -> Result<HandlerReply, HandlerError> {
        let payload: MoveCharacterPayload = decode_payload(cmd)?;

        let summary = self
            .presence
            .move_character(
                payload.old_location_id.as_deref(),
                &payload.new_location_id,
                payload.character_id,
            )
            .await;

        Ok(HandlerReply::new(format!(
            "Character {} moved to {}",
            payload.character_id, payload.new_location_id
        ))
        .with_data(json!({
            "character_id": payload.character_id,
            "location_id": payload.new_location_id,
            "summary": summary,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MockLocationStateStore;

    #[tokio::test]
    async fn move_reports_destination_summary() {
        let store = Arc::new(MockLocationStateStore::new());
        let presence = Arc::new(PresenceManager::new(store));
        let handler = MoveCharacterHandler::new(presence.clone());

        presence.add_player("tavern", 7).await;

        let cmd = CommandEnvelope::new(
            MOVE_CHARACTER_TO_LOCATION,
            serde_json::json!({
                "character_id": 7,
                "old_location_id": "tavern",
                "new_location_id": "road",
            }),
        );
        let reply = handler.handle(&cmd).await.unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data["summary"]["players_in_location"], 1);
        assert_eq!(presence.summary("tavern").await.players_in_location, 0);
    }

    #[tokio::test]
    async fn missing_destination_is_a_validation_error() {
        let store = Arc::new(MockLocationStateStore::new());
        let handler = MoveCharacterHandler::new(Arc::new(PresenceManager::new(store)));

        let cmd = CommandEnvelope::new(
            MOVE_CHARACTER_TO_LOCATION,
            serde_json::json!({"character_id": 7}),
        );
        assert!(handler.handle(&cmd).await.is_err());
    }
}
