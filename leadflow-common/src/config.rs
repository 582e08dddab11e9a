//! Configuration loading
//!
//! The whole configuration is an explicit value: loaded once at startup and
//! passed into each component's constructor. Resolution priority is
//! CLI argument → environment variable → TOML file → compiled default.

use crate::model::CrmSource;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-source connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub api_url: String,
    pub api_key: String,
    /// Bound on every remote call by this connector
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// HTTP serving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5810
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Fallback lookback window when no watermark is stored yet
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Bound on a single source's whole fetch, in seconds
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
}

fn default_lookback_hours() -> i64 {
    168 // 7 days
}

fn default_source_timeout_secs() -> u64 {
    120
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            source_timeout_secs: default_source_timeout_secs(),
        }
    }
}

/// Writeback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritebackConfig {
    /// Attempts for the external dispatch before giving up
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_retry_budget() -> u32 {
    3
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
        }
    }
}

/// Top-level configuration for the lead scoring service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Trained model artifact (JSON)
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub writeback: WritebackConfig,
    /// Connector credentials keyed by source name ("VinSolutions", "CDK", ...)
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("leadflow.db")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/leadflow-model.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            model_path: default_model_path(),
            serve: ServeConfig::default(),
            ingest: IngestConfig::default(),
            writeback: WritebackConfig::default(),
            connectors: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        Ok(config)
    }

    /// Resolve the config file path: CLI argument → LEADFLOW_CONFIG env →
    /// default `leadflow.toml` in the working directory.
    ///
    /// A missing file is not an error; defaults apply (connectors then stay
    /// unconfigured and ingestion/writeback for them is skipped).
    pub fn resolve(cli_path: Option<&Path>) -> Result<Config> {
        let candidate = match cli_path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var("LEADFLOW_CONFIG") {
                Ok(p) => PathBuf::from(p),
                Err(_) => PathBuf::from("leadflow.toml"),
            },
        };

        if candidate.exists() {
            Config::load(&candidate)
        } else if cli_path.is_some() {
            // Explicitly named config must exist
            Err(Error::Config(format!(
                "Config file not found: {}",
                candidate.display()
            )))
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Connector configuration for a source, if one is configured
    pub fn connector(&self, source: CrmSource) -> Option<&ConnectorConfig> {
        self.connectors.get(source.as_str())
    }
}
