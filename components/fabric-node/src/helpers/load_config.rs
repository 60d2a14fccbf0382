//! Typed configuration for the dispatch fabric, loaded from a TOML file and
//! layered with environment overrides via the `config` crate.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub grpc_server_address: String,
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub metrics_bind_address: String,
    /// Directory rolling log files are written under. Defaults to `./logs`
    /// when absent from the configuration file.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    pub embedder_model_configs: Vec<TopicConfig>,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicConfig {
    pub strategy_name: String,
    pub target_topic: String,
    pub nb_instances: u32,
    #[serde(default)]
    pub options: HashMap<String, toml::Value>,
    #[serde(default)]
    pub zmq_tcp_address: Option<String>,
    /// Reserved for future per-task timeout enforcement; read but not
    /// currently applied anywhere in the worker loop.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

impl Config {
    /// Load and parse the configuration file, layering `FABRIC_` prefixed
    /// environment variables over the TOML file's values.
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Loading fabric-node configuration file"
        );

        let settings = config::Config::builder()
            .add_source(config::File::from(path_ref.to_path_buf()))
            .add_source(config::Environment::with_prefix("FABRIC").separator("__"))
            .build()
            .map_err(|e| ConfigError::Read {
                path: path_ref.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let cfg: Config = settings.try_deserialize().map_err(|e| {
            tracing::error!(error = %e, "Failed to parse fabric-node configuration");
            ConfigError::Parse(e.to_string())
        })?;

        cfg.validate()?;

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            topics = cfg.embedder_model_configs.len(),
            "fabric-node configuration file loaded successfully"
        );
        Ok(cfg)
    }

    /// Enforce the invariants named in the data model: topic names are
    /// unique and every referenced strategy name is one this binary knows
    /// how to construct.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for topic in &self.embedder_model_configs {
            *seen.entry(topic.target_topic.as_str()).or_insert(0) += 1;
        }
        let duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect();
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateTopics(duplicates));
        }

        for topic in &self.embedder_model_configs {
            if !crate::fabric::strategy::is_known(&topic.strategy_name) {
                return Err(ConfigError::UnknownStrategy(topic.strategy_name.clone()));
            }
        }

        Ok(())
    }
}
