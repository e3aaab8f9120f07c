//! Command handlers.
//!
//! A handler is the business-logic unit the router invokes for one command
//! type. Handlers decode their own payloads, call into the engine or the
//! presence manager, and return a reply or a typed error; the router owns
//! turning either into a result envelope.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::{
    CommandEnvelope, ErrorDetail, DB_ERROR_CLEANUP, INTERNAL_SERVER_ERROR, SERVER_ERROR,
    VALIDATION_FAILED,
};
use crate::shard::EngineError;

pub mod assign_shard;
pub mod cleanup;
pub mod location_summary;
pub mod move_character;

pub use assign_shard::AssignShardHandler;
pub use cleanup::CleanupInactivePlayersHandler;
pub use location_summary::LocationSummaryHandler;
pub use move_character::MoveCharacterHandler;

/// Successful handler output.
#[derive(Debug, Clone)]
pub struct HandlerReply {
    pub message: String,
    pub data: Option<Value>,
}

impl HandlerReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failure modes a handler can report.
///
/// Business failures are expected, recoverable conditions; everything else
/// is surfaced as a server-side error.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Business { code: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Structured error detail for the failure result.
    pub fn to_detail(&self) -> ErrorDetail {
        match self {
            Self::Validation { message } => ErrorDetail::new(VALIDATION_FAILED, message.clone()),
            Self::Business { code, message } => ErrorDetail::new(code.clone(), message.clone()),
            Self::Engine(e) => ErrorDetail::new(INTERNAL_SERVER_ERROR, e.to_string()),
            Self::Internal(message) => ErrorDetail::new(SERVER_ERROR, message.clone()),
        }
    }
}

/// One command type's business logic.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command name this handler is registered under.
    fn command(&self) -> &'static str;

    /// Routing-key domain attached to results.
    fn domain(&self) -> &'static str {
        "system"
    }

    /// Routing-key action attached to results.
    fn action(&self) -> &'static str {
        "default"
    }

    async fn handle(&self, cmd: &CommandEnvelope) -> Result<HandlerReply, HandlerError>;
}

/// Decode a command payload into the handler's expected shape.
pub fn decode_payload<T: DeserializeOwned>(cmd: &CommandEnvelope) -> Result<T, HandlerError> {
    serde_json::from_value(cmd.payload.clone()).map_err(|e| HandlerError::Validation {
        message: format!("Invalid payload for '{}': {}", cmd.command, e),
    })
}

/// Map a cleanup engine failure onto the cleanup-specific error code.
pub(crate) fn cleanup_error(e: EngineError) -> HandlerError {
    HandlerError::business(DB_ERROR_CLEANUP, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Debug)]
    struct Payload {
        account_id: i64,
    }

    #[test]
    fn decode_payload_surfaces_validation_error() {
        let cmd = CommandEnvelope::new("assign_account_to_shard", json!({"account_id": "seven"}));
        let err = decode_payload::<Payload>(&cmd).unwrap_err();
        assert_eq!(err.to_detail().code, VALIDATION_FAILED);

        let cmd = CommandEnvelope::new("assign_account_to_shard", json!({"account_id": 7}));
        let payload: Payload = decode_payload(&cmd).unwrap();
        assert_eq!(payload.account_id, 7);
    }

    #[test]
    fn business_errors_keep_their_code() {
        let err = HandlerError::business("SHARD_ASSIGNMENT_FAILED_NO_SPACE", "full");
        assert_eq!(err.to_detail().code, "SHARD_ASSIGNMENT_FAILED_NO_SPACE");
    }
}
