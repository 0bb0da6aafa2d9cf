//! The `tac.toml` file.
//!
//! Every section is optional; a missing section takes the defaults of the
//! crate that owns it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tac_agent::ModelConfig;
use tac_core::{TacError, TacResult};
use tac_memory::{MemoryBackendKind, MemoryConfig};
use tac_orchestrator::{OrchestratorConfig, VariantResolver, WorkerSettings};

/// Full runtime configuration for the `tac` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TacConfig {
    /// Queue, pool and retry settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Generation provider and model.
    #[serde(default)]
    pub llm: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl TacConfig {
    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> TacResult<()> {
        self.orchestrator.validate()?;
        VariantResolver::new(&self.orchestrator.worker_variant_map)?;
        if self.memory.backend == MemoryBackendKind::JsonFile && self.memory.path.is_none() {
            return Err(TacError::Config(
                "memory.path is required for the json_file backend".into(),
            ));
        }
        if self.memory.embedding_dimension == 0 {
            return Err(TacError::Config(
                "memory.embedding_dimension must be greater than 0".into(),
            ));
        }
        if self.workers.interpreter.trim().is_empty() {
            return Err(TacError::Config("workers.interpreter must not be empty".into()));
        }
        Ok(())
    }

    /// Copy suitable for printing: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.llm.api_key.is_empty() {
            config.llm.api_key = "********".to_string();
        }
        config
    }
}

/// Read and parse a config file.
pub fn parse_config(path: &Path) -> TacResult<TacConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TacError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|e| {
        TacError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })
}

/// Load `path` if given; otherwise `tac.toml` when present, else defaults.
pub fn load(path: Option<&Path>) -> TacResult<TacConfig> {
    let config = match path {
        Some(path) => parse_config(path)?,
        None => {
            let default_path = Path::new("tac.toml");
            if default_path.exists() {
                parse_config(default_path)?
            } else {
                TacConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}
