//! Gateway configuration.
//!
//! Values come from an optional config file (named by `TSDB_GATEWAY_CONFIG`,
//! default `tsdb-gateway` with any extension the `config` crate understands)
//! overlaid by `TSDB_GATEWAY__*` environment variables, e.g.
//! `TSDB_GATEWAY__LOG_QUERIES__ENABLE=true`.
//!
//! | Key                             | Default         |
//! |---------------------------------|-----------------|
//! | `bind_addr`                     | `0.0.0.0:8080`  |
//! | `hostname`                      | `localhost`     |
//! | `server_type`                   | `ALL`           |
//! | `cache_dir`                     | system temp dir |
//! | `aggregate_stats`               | `false`         |
//! | `return_query_in_response`      | `false`         |
//! | `log_queries.enable`            | `false`         |
//! | `log_queries.ttl_secs`          | `86400`         |
//! | `log_queries.greater_than_secs` | `60`            |
//! | `memory_pause_ms`               | `1000`          |
//! | `memory_monitor_percent`        | `95`            |
//! | `report_interval_secs`          | `60`            |
//! | `max_request_bytes`             | `10485760`      |

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::gate::{EnabledSet, GateConfigError};

const CONFIG_FILE_VAR: &str = "TSDB_GATEWAY_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "tsdb-gateway";
const ENV_PREFIX: &str = "TSDB_GATEWAY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    ServerType(#[from] GateConfigError),
}

/// Slow-query logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogQueriesConfig {
    pub enable: bool,
    pub ttl_secs: u32,
    pub greater_than_secs: u64,
}

impl Default for LogQueriesConfig {
    fn default() -> Self {
        Self {
            enable: false,
            ttl_secs: 86_400,
            greater_than_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub hostname: String,
    pub server_type: String,
    pub cache_dir: Option<PathBuf>,
    pub aggregate_stats: bool,
    pub return_query_in_response: bool,
    pub log_queries: LogQueriesConfig,
    pub memory_pause_ms: u64,
    pub memory_monitor_percent: u8,
    pub report_interval_secs: u64,
    pub max_request_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            hostname: "localhost".to_string(),
            server_type: "ALL".to_string(),
            cache_dir: None,
            aggregate_stats: false,
            return_query_in_response: false,
            log_queries: LogQueriesConfig::default(),
            memory_pause_ms: 1000,
            memory_monitor_percent: 95,
            report_interval_secs: 60,
            max_request_bytes: 10 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Load from the config file named in the environment (if present) and
    /// `TSDB_GATEWAY__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file =
            std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&file, ENV_PREFIX)
    }

    pub fn load_from(file: &str, env_prefix: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn enabled_set(&self) -> Result<EnabledSet, ConfigError> {
        Ok(self.server_type.parse()?)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn memory_pause(&self) -> Duration {
        Duration::from_millis(self.memory_pause_ms)
    }
}
