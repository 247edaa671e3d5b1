//! Node configuration loaded from a YAML file at startup.
//!
//! The file is read once, validated eagerly, and treated as immutable for
//! the process lifetime. Validation collects every problem instead of
//! stopping at the first one so a misconfigured node reports everything
//! in a single failed boot.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub asset_service: AssetServiceConfig,
    pub engine: EngineConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceDefaults,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identifier reported to the fleet scheduler and in callbacks.
    pub node_id: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared secret expected in the `X-Internal-Auth` header of inbound
    /// requests.
    pub internal_auth_token: String,
}

/// Where and how job outcomes are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetServiceConfig {
    pub callback_url: String,
    /// Shared secret sent in the `X-Internal-Auth` header of callbacks.
    pub internal_auth_token: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_callback_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff unit; attempt k waits `retry_delay_ms * 2^(k-2)`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the inference sidecar (e.g. `http://127.0.0.1:8188`).
    pub base_url: String,
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identity accepted on `/tryon` and reported in callbacks.
    pub model_type: String,
    pub model_version: String,
}

/// Defaults applied when a job's `config` blob omits a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceDefaults {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_callback_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_engine_timeout_secs() -> u64 {
    600
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("vton-node")
}

fn default_prompt() -> String {
    "Transfer the garment from image 2 onto the person in image 1, \
     preserving the garment's shape, sleeve length and fabric detail while \
     keeping the person's face, hair and skin unchanged."
        .to_string()
}

fn default_steps() -> u32 {
    4
}

fn default_cfg() -> f64 {
    1.0
}

impl Default for InferenceDefaults {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            steps: default_steps(),
            cfg: default_cfg(),
        }
    }
}

impl NodeConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let config: NodeConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field that has no sensible fallback, collecting all
    /// problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.server.node_id.trim().is_empty() {
            errors.push("server.node_id must not be empty".to_string());
        }
        if self.security.internal_auth_token.trim().is_empty() {
            errors.push("security.internal_auth_token must not be empty".to_string());
        }
        if self.asset_service.callback_url.trim().is_empty() {
            errors.push("asset_service.callback_url must not be empty".to_string());
        }
        if self.asset_service.internal_auth_token.trim().is_empty() {
            errors.push("asset_service.internal_auth_token must not be empty".to_string());
        }
        if self.asset_service.max_attempts == 0 {
            errors.push("asset_service.max_attempts must be > 0".to_string());
        }
        if self.asset_service.timeout_secs == 0 {
            errors.push("asset_service.timeout_secs must be > 0".to_string());
        }
        if self.engine.base_url.trim().is_empty() {
            errors.push("engine.base_url must not be empty".to_string());
        }
        if self.model.model_type.trim().is_empty() {
            errors.push("model.model_type must not be empty".to_string());
        }
        if self.model.model_version.trim().is_empty() {
            errors.push("model.model_version must not be empty".to_string());
        }
        if self.inference.steps == 0 {
            errors.push("inference.steps must be > 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}
