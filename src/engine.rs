//! Seam to the inference engine collaborator.
//!
//! The node never runs tensors itself: the engine is a sidecar process that
//! owns the GPU. [`InferenceEngine`] is the whole contract the orchestrator
//! relies on, which also makes the engine trivial to fake in tests.

use crate::config::EngineConfig;
use crate::job::ResolvedParams;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Transport(String),
    #[error("engine returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("engine returned an unusable result: {0}")]
    MalformedOutput(String),
}

/// What a successful inference produces.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub image: PathBuf,
    pub elapsed_ms: u64,
}

/// Validated inputs handed to the engine. `output_path` is where the
/// resulting image must land; it lives inside the job's workspace.
#[derive(Debug, Clone, Copy)]
pub struct EngineInputs<'a> {
    pub masked_user_image: &'a Path,
    pub garment_image: &'a Path,
    pub output_path: &'a Path,
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Whether models are loaded and the engine can run a job right now.
    async fn is_ready(&self) -> bool;

    /// Run one try-on inference. Fails when inputs are unusable, models are
    /// unavailable, or device computation fails.
    async fn infer(
        &self,
        inputs: EngineInputs<'_>,
        params: &ResolvedParams,
    ) -> Result<EngineOutput, EngineError>;
}

/// HTTP client for the inference sidecar: `GET {base}/health` for readiness,
/// `POST {base}/infer` (multipart) returning the output PNG bytes.
pub struct RemoteEngine {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteEngine {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn file_part(path: &Path) -> Result<reqwest::multipart::Part, EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read input: {e}")))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        Ok(reqwest::multipart::Part::bytes(bytes).file_name(file_name))
    }
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    async fn is_ready(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "engine health probe failed");
                false
            }
        }
    }

    async fn infer(
        &self,
        inputs: EngineInputs<'_>,
        params: &ResolvedParams,
    ) -> Result<EngineOutput, EngineError> {
        let start = Instant::now();
        let params_json = serde_json::to_string(params)
            .map_err(|e| EngineError::Transport(format!("failed to encode params: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .part("masked_user_image", Self::file_part(inputs.masked_user_image).await?)
            .part("garment_image", Self::file_part(inputs.garment_image).await?)
            .text("params", params_json);

        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "engine rejected inference request");
            return Err(EngineError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(EngineError::MalformedOutput(
                "engine returned an empty image".to_string(),
            ));
        }
        tokio::fs::write(inputs.output_path, &bytes)
            .await
            .map_err(|e| EngineError::Transport(format!("failed to write output: {e}")))?;

        Ok(EngineOutput {
            image: inputs.output_path.to_path_buf(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}
