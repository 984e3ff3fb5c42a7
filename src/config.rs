// ⚙️ Configuration - defaults, TOML file, FINSIGHT__* environment

use crate::model::ModelSettings;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `FINSIGHT__SERVER__BIND`
pub const ENV_PREFIX: &str = "FINSIGHT";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Socket address to bind
    pub bind: String,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Path of the SQLite database file
    pub database_path: String,
}

/// Anomaly model configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Where the trained model is persisted
    pub path: String,
    /// Trees in the isolation forest
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Expected share of anomalies in training data
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_estimators() -> usize {
    100
}

fn default_contamination() -> f64 {
    0.02
}

fn default_seed() -> u64 {
    42
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `config/default.toml` (optional) and the
    /// environment
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load configuration from a specific path layered over the defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layered(path.as_ref(), None)
    }

    /// `env` replaces the process environment when set
    fn load_layered(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let defaults = AppConfig::default();
        let config = Config::builder()
            .set_default("server.bind", defaults.server.bind)?
            .set_default("storage.database_path", defaults.storage.database_path)?
            .set_default("model.path", defaults.model.path)?
            .set_default("model.n_estimators", defaults.model.n_estimators as i64)?
            .set_default("model.contamination", defaults.model.contamination)?
            .set_default("model.seed", defaults.model.seed as i64)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            path: PathBuf::from(&self.model.path),
            n_estimators: self.model.n_estimators,
            contamination: self.model.contamination,
            seed: self.model.seed,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.database_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "0.0.0.0:8000".to_string(),
            },
            storage: StorageConfig {
                database_path: "./data/finsight.db".to_string(),
            },
            model: ModelConfig {
                path: "./models/isolation_forest.json".to_string(),
                n_estimators: default_n_estimators(),
                contamination: default_contamination(),
                seed: default_seed(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
