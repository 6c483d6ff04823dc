use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    logging::LoggingConfig,
    pubsub::{BrokerConfig, DEFAULT_BACKLOG_WARN_THRESHOLD},
    server::ConnectionConfig,
};

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:50051";
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "SUBPUB_CONFIG";

/// Process configuration.
///
/// Sources, lowest priority first: built-in defaults, a configuration file
/// (`$SUBPUB_CONFIG`, or `config.{yaml,toml,json}` in the working directory
/// if present), then `SUBPUB_*` environment variables. Nested keys use a
/// double underscore, e.g. `SUBPUB_LOG__LEVEL=debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub listen_address: String,
    pub shutdown_timeout_ms: u64,
    /// Per-subscriber queue depth that triggers a backlog warning.
    pub backlog_warn_threshold: usize,
    pub max_connections: usize,
    #[serde(default)]
    pub log: LoggingConfig,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref())
    }

    /// Loads settings, reading `path` (which must exist) instead of the
    /// optional `config.*` file.
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("listen_address", DEFAULT_LISTEN_ADDRESS)?
            .set_default("shutdown_timeout_ms", DEFAULT_SHUTDOWN_TIMEOUT_MS)?
            .set_default(
                "backlog_warn_threshold",
                DEFAULT_BACKLOG_WARN_THRESHOLD as u64,
            )?
            .set_default("max_connections", DEFAULT_MAX_CONNECTIONS as u64)?;

        let builder = match path {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("SUBPUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_address.trim().is_empty() {
            return Err(ConfigError::Message("listen_address must not be empty".into()));
        }
        if self.backlog_warn_threshold == 0 {
            return Err(ConfigError::Message(
                "backlog_warn_threshold must be at least 1".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Message("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            backlog_warn_threshold: self.backlog_warn_threshold,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_connections: self.max_connections,
            ..Default::default()
        }
    }
}
