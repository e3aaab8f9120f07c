//! Configuration for shardmesh services.
//!
//! Supports YAML file and environment variable overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::bus::EVENTS_EXCHANGE;
use crate::shard::INACTIVITY_THRESHOLD_HOURS;

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection.
    pub amqp: AmqpSettings,
    /// Relational store connection.
    pub database: DatabaseSettings,
    /// Document store connection.
    pub document_store: DocumentStoreSettings,
    /// Command intake runtime settings.
    pub intake: IntakeConfig,
    /// Shard engine settings.
    pub shard: ShardSettings,
}

/// Broker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpSettings {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange for result deliveries and events.
    pub exchange: String,
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: EVENTS_EXCHANGE.to_string(),
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection URL.
    pub url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/shardmesh".to_string(),
            max_connections: 5,
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentStoreSettings {
    /// MongoDB connection URL.
    pub url: String,
    /// Database holding the location state collection.
    pub database: String,
}

impl Default for DocumentStoreSettings {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "shardmesh".to_string(),
        }
    }
}

/// Command intake runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Queue this service consumes.
    pub queue: String,
    /// Concurrency limiter size.
    pub max_concurrent: usize,
    /// Wall-clock deadline per command, in seconds.
    pub command_timeout_secs: u64,
}

impl IntakeConfig {
    /// Per-command deadline as a duration.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            queue: "shardmesh.commands".to_string(),
            max_concurrent: 50,
            command_timeout_secs: 30,
        }
    }
}

/// Shard engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardSettings {
    /// Accounts idle longer than this lose their binding to reclamation.
    pub inactivity_threshold_hours: i64,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            inactivity_threshold_hours: INACTIVITY_THRESHOLD_HOURS,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file (`SHARDMESH_CONFIG`, default `config.yaml`)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SHARDMESH_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AMQP_URL") {
            self.amqp.url = url;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(url) = std::env::var("MONGO_URL") {
            self.document_store.url = url;
        }

        if let Ok(queue) = std::env::var("SERVICE_QUEUE") {
            self.intake.queue = queue;
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.amqp.url, "amqp://localhost:5672");
        assert_eq!(config.intake.queue, "shardmesh.commands");
        assert_eq!(config.intake.max_concurrent, 50);
        assert_eq!(config.intake.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.shard.inactivity_threshold_hours, 24);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
amqp:
  url: amqp://broker:5672

database:
  url: postgres://db/game
  max_connections: 20

document_store:
  url: mongodb://docs:27017
  database: world

intake:
  queue: auth.commands
  max_concurrent: 100
  command_timeout_secs: 10

shard:
  inactivity_threshold_hours: 48
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.amqp.url, "amqp://broker:5672");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.document_store.database, "world");
        assert_eq!(config.intake.queue, "auth.commands");
        assert_eq!(config.intake.max_concurrent, 100);
        assert_eq!(config.shard.inactivity_threshold_hours, 48);
    }
}
