//! AMQP (RabbitMQ) message bus implementation.
//!
//! Uses a topic exchange for result deliveries and durable per-service
//! queues for command intake. Messages are persistent MessagePack bodies.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tracing::{debug, error, info};

use super::{BusError, Delivery, DeliveryStream, MessageBus, Receipt, Result, EVENTS_EXCHANGE};

/// Configuration for the AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Topic exchange for result deliveries and events.
    pub exchange: String,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: EVENTS_EXCHANGE.to_string(),
        }
    }
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self::new("amqp://localhost:5672")
    }
}

/// RabbitMQ-backed message bus.
pub struct AmqpMessageBus {
    pool: Pool,
    config: AmqpConfig,
}

impl AmqpMessageBus {
    /// Connect and declare the events exchange.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        // Verify connection and set up topology
        let conn = pool
            .get()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

        info!(
            exchange = %config.exchange,
            url = %config.url,
            "Connected to AMQP"
        );

        Ok(Self { pool, config })
    }

    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn publish_raw(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/msgpack".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            "Published message"
        );

        Ok(())
    }
}

#[async_trait]
impl MessageBus for AmqpMessageBus {
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()> {
        self.publish_raw(exchange, routing_key, body).await
    }

    async fn publish_to_queue(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        // Default exchange routes by queue name.
        self.publish_raw("", queue, body).await
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let channel = self.get_channel().await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(format!("Failed to declare queue: {}", e)))?;

        let consumer = channel
            .basic_consume(
                queue,
                "shardmesh-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(format!("Failed to start consumer: {}", e)))?;

        info!(queue = %queue, url = %self.config.url, "Consuming from queue");

        let stream = consumer
            .filter_map(move |delivery| {
                // The channel must outlive the consumer stream.
                let _keep_alive = &channel;
                let mapped = match delivery {
                    Ok(d) => {
                        let reply_to = d
                            .properties
                            .reply_to()
                            .as_ref()
                            .map(|s| s.as_str().to_string());
                        Some(Delivery {
                            body: d.data,
                            reply_to,
                            receipt: Box::new(AmqpReceipt { acker: d.acker }),
                        })
                    }
                    Err(e) => {
                        error!(error = %e, "Consumer error");
                        None
                    }
                };
                async move { mapped }
            })
            .boxed();

        Ok(stream)
    }
}

/// Settlement handle wrapping the lapin acker.
struct AmqpReceipt {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Receipt for AmqpReceipt {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(Default::default())
            .await
            .map_err(|e| BusError::Ack(format!("Failed to ack: {}", e)))
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Ack(format!("Failed to nack: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_events_exchange() {
        let config = AmqpConfig::default();
        assert_eq!(config.exchange, EVENTS_EXCHANGE);
        assert_eq!(config.url, "amqp://localhost:5672");
    }
}
