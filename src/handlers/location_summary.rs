//! Read-only location summary handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{decode_payload, CommandHandler, HandlerError, HandlerReply};
use crate::envelope::CommandEnvelope;
use crate::presence::PresenceManager;

pub const GET_LOCATION_SUMMARY: &str = "get_location_summary";

#[derive(Debug, Deserialize)]
struct LocationSummaryPayload {
    location_id: String,
}

/// Reports who is currently present in a location.
pub struct LocationSummaryHandler {
    presence: Arc<PresenceManager>,
}

impl LocationSummaryHandler {
    pub fn new(presence: Arc<PresenceManager>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl CommandHandler for LocationSummaryHandler {
    fn command(&self) -> &'static str {
        GET_LOCATION_SUMMARY
    }

    fn domain(&self) -> &'static str {
        "game"
    }

    fn action(&self) -> &'static str {
        GET_LOCATION_SUMMARY
    }

    async fn handle(&self, cmd: &CommandEnvelope) -> Result<HandlerReply, HandlerError> {
        let payload: LocationSummaryPayload = decode_payload(cmd)?;

        let summary = self.presence.summary(&payload.location_id).await;

        Ok(HandlerReply::new(format!(
            "Summary for location {}",
            payload.location_id
        ))
        .with_data(json!({
            "location_id": payload.location_id,
            "summary": summary,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MockLocationStateStore;

    #[tokio::test]
    async fn unknown_location_summarizes_to_zero() {
        let store = Arc::new(MockLocationStateStore::new());
        let handler = LocationSummaryHandler::new(Arc::new(PresenceManager::new(store)));

        let cmd = CommandEnvelope::new(
            GET_LOCATION_SUMMARY,
            serde_json::json!({"location_id": "nowhere"}),
        );
        let reply = handler.handle(&cmd).await.unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data["summary"]["players_in_location"], 0);
        assert_eq!(data["summary"]["npcs_in_location"], 0);
    }
}
