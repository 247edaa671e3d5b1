//! Job payload and outcome types shared by the request boundary, the
//! orchestrator and the callback client.

use crate::config::InferenceDefaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// One try-on submission, created at acceptance and consumed entirely by a
/// single orchestrator run. The identifiers are opaque correlation values
/// passed through to the callback, never interpreted here.
#[derive(Debug, Clone)]
pub struct TryonJob {
    pub job_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Raw bytes of the masked person image, as uploaded.
    pub masked_user_image: Vec<u8>,
    /// Raw bytes of the garment image, as uploaded.
    pub garment_image: Vec<u8>,
    pub options: InferenceOptions,
}

/// Caller-supplied inference settings from the free-form `config` blob.
/// Unset keys fall back to the node's configured defaults; the seed default
/// is resolved by the orchestrator so it can be logged for reproduction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceOptions {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub cfg: Option<f64>,
}

impl InferenceOptions {
    /// Parse the `config` form field. Invalid JSON is worth a warning but
    /// not a rejection; the job proceeds with defaults.
    pub fn from_config_field(job_id: &str, raw: Option<&str>) -> Self {
        match raw {
            None => Self::default(),
            Some(text) => match serde_json::from_str(text) {
                Ok(options) => options,
                Err(err) => {
                    warn!(job_id, error = %err, "invalid config JSON, using defaults");
                    Self::default()
                }
            },
        }
    }
}

/// Fully resolved parameters handed to the engine. Every field is concrete;
/// the seed was either caller-supplied or freshly drawn by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedParams {
    pub prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
}

impl ResolvedParams {
    #[must_use]
    pub fn resolve(options: &InferenceOptions, defaults: &InferenceDefaults, seed: u64) -> Self {
        Self {
            prompt: options
                .prompt
                .clone()
                .unwrap_or_else(|| defaults.prompt.clone()),
            seed: options.seed.unwrap_or(seed),
            steps: options.steps.unwrap_or(defaults.steps),
            cfg: options.cfg.unwrap_or(defaults.cfg),
        }
    }
}

/// Why a job failed. Engine readiness gets its own kind so a node that lost
/// its models is distinguishable from a genuine inference fault downstream.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid {artifact}: {reason}")]
    ValidationFailed { artifact: String, reason: String },
    #[error("engine not ready: models unavailable")]
    EngineNotReady,
    #[error("inference failed: {0}")]
    EngineFailure(String),
}

/// Internal classification of one finished job, independent of whether its
/// delivery succeeded.
#[derive(Debug)]
pub enum JobOutcome {
    /// Inference produced an output image.
    Success {
        output_image: PathBuf,
        elapsed_ms: u64,
    },
    /// The job failed before or during inference.
    Failed(JobError),
}

impl JobOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
