//! Command and result envelopes exchanged over the broker.
//!
//! A `CommandEnvelope` is created by a caller, travels read-only through the
//! system, and produces exactly one `ResultEnvelope` carrying the same
//! correlation id. Envelopes are MessagePack on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Error codes
// ============================================================================

/// No handler registered for the command name.
pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";
/// Payload failed to decode into the handler's expected shape.
pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
/// Unexpected handler failure caught at the router boundary.
pub const SERVER_ERROR: &str = "SERVER_ERROR";
/// Infrastructure failure surfaced through the transaction boundary.
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
/// No shard had a free slot, even after reclamation.
pub const SHARD_ASSIGNMENT_FAILED_NO_SPACE: &str = "SHARD_ASSIGNMENT_FAILED_NO_SPACE";
/// Database failure during the reclamation pass.
pub const DB_ERROR_CLEANUP: &str = "DB_ERROR_CLEANUP";

/// Errors from envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

// ============================================================================
// Command envelope
// ============================================================================

/// A command submitted by an untrusted client, immutable once created.
///
/// `correlation_id` is generated by the sender and never regenerated
/// downstream. `client_id` identifies the requester for response routing
/// only; business logic never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name discriminator, e.g. `assign_account_to_shard`.
    pub command: String,
    /// Opaque token linking this command to its eventual result.
    pub correlation_id: Uuid,
    /// Causal trace id, if the caller is tracing.
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    /// Causal span id, if the caller is tracing.
    #[serde(default)]
    pub span_id: Option<Uuid>,
    /// Creation time at the sender.
    pub timestamp: DateTime<Utc>,
    /// Opaque id of the requesting connection, used only for delivery.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Command-specific structured payload.
    #[serde(default)]
    pub payload: Value,
}

impl CommandEnvelope {
    /// Build a new command with a fresh correlation id.
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self {
            command: command.into(),
            correlation_id: Uuid::new_v4(),
            trace_id: None,
            span_id: None,
            timestamp: Utc::now(),
            client_id: None,
            payload,
        }
    }

    /// Attach the requesting client's id for response routing.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

// ============================================================================
// Result envelope
// ============================================================================

/// Structured error attached to a failure result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }
}

/// Produced exactly once per processed command.
///
/// Invariant: `correlation_id` always equals that of the command that
/// produced it; the constructors below copy it and there is no setter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub correlation_id: Uuid,
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    #[serde(default)]
    pub span_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ResultEnvelope {
    /// Success result correlated to `cmd`.
    pub fn ok(cmd: &CommandEnvelope, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            correlation_id: cmd.correlation_id,
            trace_id: cmd.trace_id,
            span_id: cmd.span_id,
            client_id: cmd.client_id.clone(),
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    /// Failure result correlated to `cmd`.
    pub fn fail(cmd: &CommandEnvelope, message: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            correlation_id: cmd.correlation_id,
            trace_id: cmd.trace_id,
            span_id: cmd.span_id,
            client_id: cmd.client_id.clone(),
            success: false,
            message: message.into(),
            data: None,
            error: Some(error),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

// ============================================================================
// Delivery envelope
// ============================================================================

/// Delivery status derived from `ResultEnvelope::success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Wrapper published to the events exchange for the delivery subsystem.
///
/// The delivery subsystem fans out on the routing key; it only needs the
/// correlation fields, the client id and the status without unpacking the
/// inner result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    /// Always `"RESPONSE"` for command results.
    #[serde(rename = "type")]
    pub kind: String,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    #[serde(default)]
    pub span_id: Option<Uuid>,
    pub client_id: String,
    pub status: ResponseStatus,
    pub payload: ResultEnvelope,
}

impl DeliveryEnvelope {
    /// Wrap a result for delivery to `client_id`.
    pub fn response(client_id: String, result: ResultEnvelope) -> Self {
        let status = if result.success {
            ResponseStatus::Success
        } else {
            ResponseStatus::Failure
        };
        Self {
            kind: "RESPONSE".to_string(),
            correlation_id: result.correlation_id,
            trace_id: result.trace_id,
            span_id: result.span_id,
            client_id,
            status,
            payload: result,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

// ============================================================================
// Administrative notification
// ============================================================================

/// Fire-and-forget operator alert, e.g. when every shard is full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminNotification {
    /// Machine-readable reason, e.g. `SHARDS_FULL`.
    pub reason: String,
    /// Human-readable description for the alerting surface.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AdminNotification {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}
