// runtime configuration: timeouts, retry budgets, link and database location
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tmtc_protocol::{DEFAULT_DOWNLINK_RETRIES, DEFAULT_TIMEOUT_MS, DEFAULT_UPLINK_RETRIES};

use crate::link::LinkConfig;

/// Environment variables override the file as `TMTC__<FIELD>`.
pub const ENV_PREFIX: &str = "TMTC";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub default_timeout_ms: u64,
    pub uplink_max_retries: u32,
    pub downlink_max_retries: u32,
    /// Capacity of queue subscribers created through the session.
    pub telemetry_queue_capacity: usize,
    pub database: Option<PathBuf>,
    pub link: LinkConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            uplink_max_retries: DEFAULT_UPLINK_RETRIES,
            downlink_max_retries: DEFAULT_DOWNLINK_RETRIES,
            telemetry_queue_capacity: 256,
            database: None,
            link: LinkConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Optional TOML file, then `TMTC__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`ClientConfig::load`], reading variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let cfg: ClientConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("default_timeout_ms must be positive".into()));
        }
        if self.telemetry_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "telemetry_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
