//! Response publication protocol.
//!
//! Translates a result envelope into a broker message addressed to the
//! delivery subsystem that owns the originating client connection. Routing
//! keys follow `response.<domain>.<action>.<success|failure>`; the
//! delivery subsystem fans out on the key alone.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{BusError, MessageBus, EVENTS_EXCHANGE};
use crate::envelope::{DeliveryEnvelope, EnvelopeError, ResultEnvelope};

/// Errors while publishing a result.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Routing attributes a handler attaches to its results.
#[derive(Debug, Clone)]
pub struct RouteAttrs {
    pub domain: String,
    pub action: String,
}

impl Default for RouteAttrs {
    fn default() -> Self {
        Self {
            domain: "system".to_string(),
            action: "default".to_string(),
        }
    }
}

impl RouteAttrs {
    pub fn new(domain: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            action: action.into(),
        }
    }
}

/// Publishes result envelopes for delivery.
pub struct ResponsePublisher {
    bus: Arc<dyn MessageBus>,
    exchange: String,
}

impl ResponsePublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            exchange: EVENTS_EXCHANGE.to_string(),
        }
    }

    /// Routing key for a result: `response.<domain>.<action>.<status>`.
    pub fn routing_key(route: &RouteAttrs, success: bool) -> String {
        let status = if success { "success" } else { "failure" };
        format!("response.{}.{}.{}", route.domain, route.action, status)
    }

    /// Publish one result.
    ///
    /// With a `reply_to` address the raw result goes straight to that queue
    /// (RPC variant). Otherwise the result is wrapped in a delivery
    /// envelope and routed through the events exchange. A result carrying
    /// no `client_id` has no one to deliver to and is logged and dropped
    /// (a caller bug, not a system fault).
    pub async fn publish(
        &self,
        result: ResultEnvelope,
        route: &RouteAttrs,
        reply_to: Option<&str>,
    ) -> Result<(), PublishError> {
        if let Some(reply_to) = reply_to {
            let body = result.encode()?;
            self.bus.publish_to_queue(reply_to, body).await?;
            debug!(
                correlation_id = %result.correlation_id,
                reply_to,
                "Published RPC reply"
            );
            return Ok(());
        }

        let Some(client_id) = result.client_id.clone() else {
            warn!(
                correlation_id = %result.correlation_id,
                "Result has no client id; dropping"
            );
            return Ok(());
        };

        let routing_key = Self::routing_key(route, result.success);
        let delivery = DeliveryEnvelope::response(client_id, result);
        let body = delivery.encode()?;

        self.bus.publish(&self.exchange, &routing_key, body).await?;
        debug!(
            correlation_id = %delivery.correlation_id,
            routing_key = %routing_key,
            "Published result delivery"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::envelope::{CommandEnvelope, ErrorDetail, ResultEnvelope, SERVER_ERROR};
    use serde_json::json;

    #[test]
    fn routing_key_reflects_route_and_status() {
        let route = RouteAttrs::new("auth", "assign_account_to_shard");
        assert_eq!(
            ResponsePublisher::routing_key(&route, true),
            "response.auth.assign_account_to_shard.success"
        );
        assert_eq!(
            ResponsePublisher::routing_key(&route, false),
            "response.auth.assign_account_to_shard.failure"
        );
        assert_eq!(
            ResponsePublisher::routing_key(&RouteAttrs::default(), true),
            "response.system.default.success"
        );
    }

    #[tokio::test]
    async fn wraps_result_in_delivery_envelope() {
        let bus = Arc::new(MockMessageBus::new());
        let publisher = ResponsePublisher::new(bus.clone());

        let cmd = CommandEnvelope::new("x", json!({})).with_client("bot-1");
        let result = ResultEnvelope::ok(&cmd, "done", None);
        publisher
            .publish(result, &RouteAttrs::new("game", "x"), None)
            .await
            .unwrap();

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "response.game.x.success");

        let delivery = DeliveryEnvelope::decode(&published[0].body).unwrap();
        assert_eq!(delivery.correlation_id, cmd.correlation_id);
        assert_eq!(delivery.client_id, "bot-1");
    }

    #[tokio::test]
    async fn result_without_client_is_dropped() {
        let bus = Arc::new(MockMessageBus::new());
        let publisher = ResponsePublisher::new(bus.clone());

        let cmd = CommandEnvelope::new("x", json!({}));
        let result = ResultEnvelope::fail(&cmd, "boom", ErrorDetail::new(SERVER_ERROR, "boom"));
        publisher
            .publish(result, &RouteAttrs::default(), None)
            .await
            .unwrap();

        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn reply_to_bypasses_the_exchange() {
        let bus = Arc::new(MockMessageBus::new());
        let publisher = ResponsePublisher::new(bus.clone());

        let cmd = CommandEnvelope::new("x", json!({}));
        let result = ResultEnvelope::ok(&cmd, "done", None);
        publisher
            .publish(result, &RouteAttrs::default(), Some("rpc.reply.q"))
            .await
            .unwrap();

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "");
        assert_eq!(published[0].routing_key, "rpc.reply.q");

        let reply = ResultEnvelope::decode(&published[0].body).unwrap();
        assert_eq!(reply.correlation_id, cmd.correlation_id);
    }
}
