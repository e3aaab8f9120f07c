//! shardmesh-service: command-consuming backend service
//!
//! Wires the dependency graph top-down and runs one command intake runtime
//! against the configured queue:
//!
//! ```text
//! [Broker queue] -> [Command Intake] -> [Router] -> [Handlers]
//!                                                      |
//!                              [Shard Engine (Postgres)] + [Presence (MongoDB)]
//!                                                      |
//!                                                  [Result]
//!                                                      v
//!                                  [Events exchange] -> delivery subsystem
//! ```
//!
//! ## Configuration
//! - SHARDMESH_CONFIG: path to the YAML config (default `config.yaml`)
//! - AMQP_URL / DATABASE_URL / MONGO_URL / SERVICE_QUEUE: overrides
//! - SHARDMESH_LOG: tracing filter (default `info`)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardmesh::bus::{AmqpConfig, AmqpMessageBus, MessageBus};
use shardmesh::config::Config;
use shardmesh::handlers::{
    AssignShardHandler, CleanupInactivePlayersHandler, LocationSummaryHandler,
    MoveCharacterHandler,
};
use shardmesh::intake::CommandIntake;
use shardmesh::presence::{MongoLocationStateStore, PresenceManager};
use shardmesh::response::ResponsePublisher;
use shardmesh::router::CommandRouter;
use shardmesh::shard::ShardDirectory;
use shardmesh::storage::PostgresGameStore;

/// Initialize tracing with the SHARDMESH_LOG environment variable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SHARDMESH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to the broker with exponential backoff; it frequently comes up
/// after the service in orchestrated deployments.
async fn connect_bus(config: AmqpConfig) -> Result<AmqpMessageBus, shardmesh::bus::BusError> {
    const MAX_RETRIES: u32 = 30;
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match AmqpMessageBus::new(config.clone()).await {
            Ok(bus) => return Ok(bus),
            Err(e) if attempt < MAX_RETRIES => {
                warn!(
                    "Failed to connect to broker (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt, MAX_RETRIES, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                error!(
                    "Failed to connect to broker after {} attempts: {}",
                    MAX_RETRIES, e
                );
                return Err(e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting shardmesh-service");

    let bus: Arc<dyn MessageBus> = Arc::new(
        connect_bus(AmqpConfig {
            url: config.amqp.url.clone(),
            exchange: config.amqp.exchange.clone(),
        })
        .await?,
    );

    let store = Arc::new(
        PostgresGameStore::connect(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;
    info!("Relational store ready");

    let location_store = Arc::new(
        MongoLocationStateStore::connect(
            &config.document_store.url,
            &config.document_store.database,
        )
        .await?,
    );

    let directory = Arc::new(
        ShardDirectory::new(store, bus.clone()).with_inactivity_threshold(
            chrono::Duration::hours(config.shard.inactivity_threshold_hours),
        ),
    );
    let presence = Arc::new(PresenceManager::new(location_store));

    let mut router = CommandRouter::new(ResponsePublisher::new(bus.clone()));
    router.register(Arc::new(AssignShardHandler::new(directory.clone())))?;
    router.register(Arc::new(CleanupInactivePlayersHandler::new(directory)))?;
    router.register(Arc::new(MoveCharacterHandler::new(presence.clone())))?;
    router.register(Arc::new(LocationSummaryHandler::new(presence)))?;
    info!(handlers = router.len(), "Command router ready");

    let intake = CommandIntake::new(bus, Arc::new(router), &config.intake);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let intake_task = tokio::spawn(async move { intake.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; draining in-flight commands");
    let _ = shutdown_tx.send(true);

    intake_task.await??;
    info!("shardmesh-service stopped");

    Ok(())
}
