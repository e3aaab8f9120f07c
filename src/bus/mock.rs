//! In-memory message bus for tests.
//!
//! Records everything published, lets tests inject deliveries into consumed
//! queues and observe how each delivery was settled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{BusError, Delivery, DeliveryStream, MessageBus, Receipt, Result};

/// A message captured by [`MockMessageBus::publish`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    /// Empty string for direct-to-queue publishes.
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Ack,
    Nack,
}

#[derive(Default)]
struct Inner {
    published: Vec<PublishedMessage>,
    consumers: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    fail_on_publish: bool,
}

/// Mock bus that stores messages in memory.
#[derive(Default)]
pub struct MockMessageBus {
    inner: Arc<Mutex<Inner>>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail with a `Publish` error.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.inner.lock().await.fail_on_publish = fail;
    }

    /// Snapshot of everything published so far.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().await.published.clone()
    }

    /// Push a delivery into a consumed queue.
    ///
    /// Returns a receiver that resolves once the delivery is acked or
    /// nacked. Panics if nothing is consuming the queue.
    pub async fn inject(
        &self,
        queue: &str,
        body: Vec<u8>,
        reply_to: Option<String>,
    ) -> oneshot::Receiver<ReceiptOutcome> {
        let (tx, rx) = oneshot::channel();
        let delivery = Delivery {
            body,
            reply_to,
            receipt: Box::new(MockReceipt { outcome: tx }),
        };

        let inner = self.inner.lock().await;
        let sender = inner
            .consumers
            .get(queue)
            .unwrap_or_else(|| panic!("no consumer bound to queue '{}'", queue));
        sender
            .send(delivery)
            .unwrap_or_else(|_| panic!("consumer for queue '{}' dropped", queue));
        rx
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_on_publish {
            return Err(BusError::Publish("mock publish failure".to_string()));
        }
        inner.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
        });
        Ok(())
    }

    async fn publish_to_queue(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.publish("", queue, body).await
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .await
            .consumers
            .insert(queue.to_string(), tx);

        Ok(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).boxed())
    }
}

struct MockReceipt {
    outcome: oneshot::Sender<ReceiptOutcome>,
}

#[async_trait]
impl Receipt for MockReceipt {
    async fn ack(self: Box<Self>) -> Result<()> {
        let _ = self.outcome.send(ReceiptOutcome::Ack);
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let _ = self.outcome.send(ReceiptOutcome::Nack);
        Ok(())
    }
}
