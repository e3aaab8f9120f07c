//! Command intake runtime.
//!
//! Binds to exactly one queue and drives every inbound message through
//! decode → concurrency slot → deadline → router. Acknowledgment policy:
//! ack on success; nack without requeue on decode failure, dispatch error
//! or timeout; fail fast and loud rather than loop on redelivery. This is
//! the only component that settles broker receipts.
//!
//! Shutdown is cooperative: a stop signal ends the intake loop, then
//! in-flight commands drain before `run` returns.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Delivery, MessageBus, Receipt};
use crate::config::IntakeConfig;
use crate::envelope::CommandEnvelope;
use crate::router::CommandRouter;

/// Bounded-concurrency consumer for one service queue.
pub struct CommandIntake {
    bus: Arc<dyn MessageBus>,
    router: Arc<CommandRouter>,
    queue: String,
    max_concurrent: usize,
    command_timeout: Duration,
}

impl CommandIntake {
    pub fn new(bus: Arc<dyn MessageBus>, router: Arc<CommandRouter>, config: &IntakeConfig) -> Self {
        Self {
            bus,
            router,
            queue: config.queue.clone(),
            max_concurrent: config.max_concurrent,
            command_timeout: config.command_timeout(),
        }
    }

    /// Consume until the shutdown signal flips to `true`, then drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let mut deliveries = self.bus.consume(&self.queue).await?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = JoinSet::new();

        info!(
            queue = %self.queue,
            max_concurrent = self.max_concurrent,
            timeout = ?self.command_timeout,
            "Command intake started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(queue = %self.queue, "Stop signal received");
                        break;
                    }
                }
                delivery = deliveries.next() => {
                    let Some(delivery) = delivery else {
                        warn!(queue = %self.queue, "Delivery stream ended");
                        break;
                    };

                    // Backpressure: wait for a slot before taking on work.
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };

                    let router = self.router.clone();
                    let timeout = self.command_timeout;
                    in_flight.spawn(async move {
                        process_delivery(router, delivery, timeout).await;
                        drop(permit);
                    });

                    // Reap whatever already finished.
                    while in_flight.try_join_next().is_some() {}
                }
            }
        }

        if !in_flight.is_empty() {
            info!(pending = in_flight.len(), "Draining in-flight commands");
        }
        while in_flight.join_next().await.is_some() {}

        info!(queue = %self.queue, "Command intake stopped");
        Ok(())
    }
}

/// Decode, dispatch under deadline, settle the receipt.
async fn process_delivery(router: Arc<CommandRouter>, delivery: Delivery, timeout: Duration) {
    let Delivery {
        body,
        reply_to,
        receipt,
    } = delivery;

    let cmd = match CommandEnvelope::decode(&body) {
        Ok(cmd) => cmd,
        Err(e) => {
            error!(error = %e, "Failed to decode command envelope");
            settle_nack(receipt).await;
            return;
        }
    };

    let command = cmd.command.clone();
    let correlation_id = cmd.correlation_id;

    match tokio::time::timeout(timeout, router.dispatch(cmd, reply_to)).await {
        Ok(Ok(())) => {
            debug!(%command, %correlation_id, "Command processed");
            if let Err(e) = receipt.ack().await {
                error!(%command, %correlation_id, error = %e, "Failed to ack");
            }
        }
        Ok(Err(e)) => {
            error!(%command, %correlation_id, error = %e, "Dispatch failed");
            settle_nack(receipt).await;
        }
        Err(_) => {
            error!(
                %command,
                %correlation_id,
                deadline = ?timeout,
                "Command processing timed out"
            );
            settle_nack(receipt).await;
        }
    }
}

async fn settle_nack(receipt: Box<dyn Receipt>) {
    if let Err(e) = receipt.nack().await {
        error!(error = %e, "Failed to nack");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockMessageBus, ReceiptOutcome};
    use crate::response::ResponsePublisher;
    use serde_json::json;

    fn intake(bus: Arc<MockMessageBus>, config: &IntakeConfig) -> CommandIntake {
        let router = Arc::new(CommandRouter::new(ResponsePublisher::new(bus.clone())));
        CommandIntake::new(bus, router, config)
    }

    #[tokio::test]
    async fn malformed_message_is_nacked() {
        let bus = Arc::new(MockMessageBus::new());
        let config = IntakeConfig::default();
        let intake = intake(bus.clone(), &config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { intake.run(shutdown_rx).await });

        // Wait until the consumer is bound before injecting.
        tokio::task::yield_now().await;
        let outcome = bus
            .inject(&config.queue, b"garbage".to_vec(), None)
            .await;
        assert_eq!(outcome.await.unwrap(), ReceiptOutcome::Nack);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_command_is_acked_with_failure_result() {
        let bus = Arc::new(MockMessageBus::new());
        let config = IntakeConfig::default();
        let intake = intake(bus.clone(), &config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { intake.run(shutdown_rx).await });
        tokio::task::yield_now().await;

        let cmd = CommandEnvelope::new("nope", json!({})).with_client("c1");
        let outcome = bus
            .inject(&config.queue, cmd.encode().unwrap(), None)
            .await;
        assert_eq!(outcome.await.unwrap(), ReceiptOutcome::Ack);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_is_nacked() {
        let bus = Arc::new(MockMessageBus::new());
        let config = IntakeConfig::default();
        let intake = intake(bus.clone(), &config);
        bus.set_fail_on_publish(true).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { intake.run(shutdown_rx).await });
        tokio::task::yield_now().await;

        let cmd = CommandEnvelope::new("nope", json!({})).with_client("c1");
        let outcome = bus
            .inject(&config.queue, cmd.encode().unwrap(), None)
            .await;
        assert_eq!(outcome.await.unwrap(), ReceiptOutcome::Nack);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
