//! Command router.
//!
//! Holds the static command→handler table, invokes the matching handler
//! and publishes the result. This is the boundary past which handler
//! failures never propagate: whatever happens inside a handler, the caller
//! gets exactly one well-formed result. The router's only fallible edge is
//! publication itself; that error reaches the intake runtime, which nacks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::envelope::{CommandEnvelope, ErrorDetail, ResultEnvelope, HANDLER_NOT_FOUND};
use crate::handlers::CommandHandler;
use crate::response::{PublishError, ResponsePublisher, RouteAttrs};

/// Errors raised while building the routing table.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Handler already registered for command '{0}'")]
    DuplicateHandler(String),
}

/// Static dispatch table from command name to handler.
pub struct CommandRouter {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
    publisher: ResponsePublisher,
}

impl CommandRouter {
    pub fn new(publisher: ResponsePublisher) -> Self {
        Self {
            handlers: HashMap::new(),
            publisher,
        }
    }

    /// Register a handler under its command name.
    ///
    /// Duplicate registrations are rejected eagerly; a silently
    /// overwritten handler is a wiring bug that must fail at startup.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Result<(), RouterError> {
        let command = handler.command();
        if self.handlers.contains_key(command) {
            return Err(RouterError::DuplicateHandler(command.to_string()));
        }
        info!(command, "Registered command handler");
        self.handlers.insert(command, handler);
        Ok(())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Process one decoded command and publish its result.
    pub async fn dispatch(
        &self,
        cmd: CommandEnvelope,
        reply_to: Option<String>,
    ) -> Result<(), PublishError> {
        let Some(handler) = self.handlers.get(cmd.command.as_str()) else {
            warn!(
                command = %cmd.command,
                correlation_id = %cmd.correlation_id,
                "No handler registered for command"
            );
            let result = ResultEnvelope::fail(
                &cmd,
                format!("Unknown command: {}", cmd.command),
                ErrorDetail::new(
                    HANDLER_NOT_FOUND,
                    format!("No handler registered for '{}'", cmd.command),
                ),
            );
            return self
                .publisher
                .publish(result, &RouteAttrs::default(), reply_to.as_deref())
                .await;
        };

        let route = RouteAttrs::new(handler.domain(), handler.action());

        let result = match handler.handle(&cmd).await {
            Ok(reply) => {
                info!(
                    command = %cmd.command,
                    correlation_id = %cmd.correlation_id,
                    "Command handled"
                );
                ResultEnvelope::ok(&cmd, reply.message, reply.data)
            }
            Err(err) => {
                error!(
                    command = %cmd.command,
                    correlation_id = %cmd.correlation_id,
                    error = %err,
                    "Handler failed"
                );
                let detail = err.to_detail();
                ResultEnvelope::fail(&cmd, err.to_string(), detail)
            }
        };

        self.publisher
            .publish(result, &route, reply_to.as_deref())
            .await
    }
}
