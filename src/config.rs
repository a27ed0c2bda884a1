// Configuration module - loads the daemon configuration file
//
// This module is responsible for:
// 1. Reading the JSON configuration document from disk
// 2. Parsing it into strongly-typed backend and monitor settings
// 3. Validating values the type system cannot express
//
// # Example Configuration
// ```json
// {
//   "backend": {
//     "type": "elasticsearch",
//     "url": "http://localhost:9200",
//     "index_prefix": "monitor"
//   },
//   "monitors": [
//     { "type": "load", "freq": 5 },
//     { "type": "diskspace", "freq": 30, "args": { "filesystems": ["/"] } }
//   ]
// }
// ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::metrics::MonitorArgs;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration format: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("monitor '{monitor}' has invalid frequency {freq}, must be at least 1 second")]
    InvalidFrequency { monitor: String, freq: u64 },

    #[error("unknown monitor type: {0}")]
    UnknownMonitor(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Storage backend; the in-memory backend when absent
    #[serde(default)]
    pub backend: BackendConfig,

    /// Monitors to schedule, in configuration order
    pub monitors: Vec<MonitorConfig>,
}

/// Backend selection, discriminated by the `type` field
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Elasticsearch(ElasticsearchConfig),
    Mongodb(MongoConfig),
    Influxdb(InfluxConfig),
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`
    pub url: String,

    #[serde(default = "default_prefix")]
    pub index_prefix: String,

    #[serde(default = "default_shards")]
    pub shards: u32,

    /// Cluster default when unset
    #[serde(default)]
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    /// Connection string, e.g. `mongodb://localhost:27017`
    pub uri: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_prefix")]
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,

    #[serde(default = "default_influx_port")]
    pub port: u16,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,
}

/// One scheduled monitor
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Collector name, looked up in the registry
    #[serde(rename = "type")]
    pub kind: String,

    /// Collection interval in seconds
    pub freq: u64,

    /// Passed verbatim to the collector
    #[serde(default)]
    pub args: MonitorArgs,
}

fn default_prefix() -> String {
    "monitor".to_string()
}

fn default_shards() -> u32 {
    1
}

fn default_database() -> String {
    "monitoring".to_string()
}

fn default_influx_port() -> u16 {
    8086
}

impl DaemonConfig {
    /// Reads, parses and validates the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses and validates a configuration document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_json::from_str(text)?;
        config.validate()?;

        info!(
            "Loaded configuration with {} monitor(s)",
            config.monitors.len()
        );
        for monitor in &config.monitors {
            info!("  {} - Interval: {}s", monitor.kind, monitor.freq);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for monitor in &self.monitors {
            if monitor.kind.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "monitor type must not be empty".to_string(),
                ));
            }
            if monitor.freq < 1 {
                return Err(ConfigError::InvalidFrequency {
                    monitor: monitor.kind.clone(),
                    freq: monitor.freq,
                });
            }
        }

        match &self.backend {
            BackendConfig::Elasticsearch(cfg) if cfg.index_prefix.is_empty() => Err(
                ConfigError::Invalid("elasticsearch index_prefix must not be empty".to_string()),
            ),
            BackendConfig::Mongodb(cfg) if cfg.collection_prefix.is_empty() => Err(
                ConfigError::Invalid("mongodb collection_prefix must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}
