//! Message bus boundary.
//!
//! This module contains:
//! - `MessageBus` trait: publish/consume against the broker
//! - `Delivery` + `Receipt`: inbound messages with explicit ack/nack
//! - Implementations: AMQP (RabbitMQ), Mock
//!
//! Receipts are settled only by the command intake runtime; a nack never
//! requeues; the system prefers fail-fast over redelivery loops.

use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod amqp;
pub mod mock;

pub use amqp::{AmqpConfig, AmqpMessageBus};
pub use mock::{MockMessageBus, PublishedMessage, ReceiptOutcome};

/// Exchange carrying result deliveries and administrative events.
pub const EVENTS_EXCHANGE: &str = "shardmesh.events";

/// Routing key for operator alerts from the shard engine.
pub const ADMIN_NOTIFICATION_ROUTING_KEY: &str = "system.notification.admins";

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Acknowledgment failed: {0}")]
    Ack(String),
}

/// Settlement handle for one inbound message.
///
/// Consuming `self` makes double-settlement unrepresentable.
#[async_trait]
pub trait Receipt: Send {
    /// Positively acknowledge the message.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negatively acknowledge without requeue.
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// One message taken from a queue, not yet settled.
pub struct Delivery {
    /// Opaque encoded envelope bytes.
    pub body: Vec<u8>,
    /// RPC reply address supplied by the caller, if any.
    pub reply_to: Option<String>,
    /// Settlement handle.
    pub receipt: Box<dyn Receipt>,
}

/// Stream of inbound deliveries from one queue.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Interface to the broker.
///
/// Implementations:
/// - `AmqpMessageBus`: RabbitMQ via lapin
/// - `MockMessageBus`: in-memory, for tests
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `body` to a named exchange with the given routing key.
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()>;

    /// Publish `body` directly to a named queue (RPC reply path).
    async fn publish_to_queue(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Start consuming from a named queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;
}
