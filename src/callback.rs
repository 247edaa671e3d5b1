//! Result delivery to the asset service.
//!
//! One multipart POST per attempt carries the job's metadata and, on
//! success, the output image. Delivery is retried with exponential backoff
//! up to a configured budget; once the budget is spent the outcome is
//! logged and dropped — there is no persistent retry queue, and a
//! downstream outage must never hold the GPU slot hostage.

use crate::config::AssetServiceConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error type for a single delivery attempt.
#[derive(Debug, Clone)]
pub struct CallbackError {
    pub message: String,
    pub kind: CallbackErrorKind,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorKind {
    /// Network/connection error
    Network,
    /// HTTP error response
    HttpError,
    /// Timeout
    Timeout,
    /// Payload could not be built
    Serialization,
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{}: {} (HTTP {})", self.kind, self.message, code),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::fmt::Display for CallbackErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::HttpError => write!(f, "HTTP error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Serialization => write!(f, "serialization error"),
        }
    }
}

impl std::error::Error for CallbackError {}

impl CallbackError {
    fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: CallbackErrorKind::Network,
            status_code: None,
        }
    }

    fn http(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            kind: CallbackErrorKind::HttpError,
            status_code: Some(status_code),
        }
    }

    fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: CallbackErrorKind::Timeout,
            status_code: None,
        }
    }

    fn serialization(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: CallbackErrorKind::Serialization,
            status_code: None,
        }
    }
}

/// Everything one callback carries. `output_image` is present on the
/// success path and absent on the error path.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub job_id: String,
    pub user_id: String,
    pub session_id: String,
    pub output_image: Option<PathBuf>,
    pub inference_time_ms: u64,
    pub error: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl CallbackRequest {
    /// Error-path callback: no artifact, zero timing.
    #[must_use]
    pub fn for_error(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            output_image: None,
            inference_time_ms: 0,
            error: Some(error.into()),
            meta: None,
        }
    }
}

/// What one `deliver` call amounted to. Ephemeral, used for logging only.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub success: bool,
    pub attempts_made: u32,
    pub last_error: Option<String>,
}

/// Client for the asset-service callback endpoint.
#[derive(Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
    config: AssetServiceConfig,
    provider: String,
    node_id: String,
    model_version: String,
}

impl CallbackClient {
    #[must_use]
    pub fn new(
        config: AssetServiceConfig,
        provider: impl Into<String>,
        node_id: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            provider: provider.into(),
            node_id: node_id.into(),
            model_version: model_version.into(),
        }
    }

    /// Deliver one job outcome, retrying with exponential backoff.
    ///
    /// Attempt k (k >= 2) is preceded by a `retry_delay_ms * 2^(k-2)` wait.
    /// Returns after the first 2xx response or once the attempt budget is
    /// exhausted; in the latter case the outcome is permanently lost from
    /// this component's perspective.
    pub async fn deliver(&self, request: &CallbackRequest) -> DeliveryReport {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<CallbackError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay_ms * (1u64 << (attempt - 2));
                debug!(
                    job_id = %request.job_id,
                    attempt,
                    delay_ms = delay,
                    "waiting before callback retry"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.send_once(request).await {
                Ok(()) => {
                    info!(
                        event = "callback_sent",
                        job_id = %request.job_id,
                        attempt,
                        "callback delivered"
                    );
                    return DeliveryReport {
                        success: true,
                        attempts_made: attempt,
                        last_error: None,
                    };
                }
                Err(err) => {
                    if attempt < max_attempts {
                        warn!(
                            event = "callback_retrying",
                            job_id = %request.job_id,
                            attempt,
                            max_attempts,
                            error = %err,
                            "callback attempt failed"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string());
        warn!(
            event = "callback_failed",
            job_id = %request.job_id,
            attempts = max_attempts,
            error = last_error.as_deref(),
            "callback failed after all attempts"
        );
        DeliveryReport {
            success: false,
            attempts_made: max_attempts,
            last_error,
        }
    }

    /// Build and send one multipart payload. The output-image file handle
    /// is opened per attempt and owned by the request body, so it is
    /// released on every exit path.
    async fn send_once(&self, request: &CallbackRequest) -> Result<(), CallbackError> {
        let mut form = reqwest::multipart::Form::new()
            .text("job_id", request.job_id.clone())
            .text("user_id", request.user_id.clone())
            .text("session_id", request.session_id.clone())
            .text("provider", self.provider.clone())
            .text("node_id", self.node_id.clone())
            .text("model_version", self.model_version.clone())
            .text("inference_time_ms", request.inference_time_ms.to_string())
            .text("completed_at", chrono::Utc::now().to_rfc3339());

        if let Some(ref error) = request.error {
            form = form.text("error", error.clone());
        }
        if let Some(ref meta) = request.meta {
            let encoded = serde_json::to_string(meta)
                .map_err(|e| CallbackError::serialization(e.to_string()))?;
            form = form.text("meta", encoded);
        }
        if let Some(ref path) = request.output_image {
            form = form.part("output_image", Self::image_part(path).await?);
        }

        let response = self
            .client
            .post(&self.config.callback_url)
            .header("X-Internal-Auth", &self.config.internal_auth_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallbackError::timeout(format!("request timed out: {e}"))
                } else if e.is_connect() {
                    CallbackError::network(format!("connection failed: {e}"))
                } else {
                    CallbackError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallbackError::http(
                format!("callback endpoint returned error: {body}"),
                status.as_u16(),
            ));
        }
        Ok(())
    }

    async fn image_part(path: &std::path::Path) -> Result<reqwest::multipart::Part, CallbackError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| CallbackError::serialization(format!("failed to open output image: {e}")))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| CallbackError::serialization(format!("failed to stat output image: {e}")))?
            .len();
        let stream = tokio_util::io::ReaderStream::new(file);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.png".to_string());
        reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| CallbackError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_status_when_present() {
        let err = CallbackError::http("rejected", 503);
        assert_eq!(err.to_string(), "HTTP error: rejected (HTTP 503)");
        let err = CallbackError::network("refused");
        assert_eq!(err.to_string(), "network error: refused");
    }

    #[test]
    fn error_callback_request_has_zero_timing_and_no_artifact() {
        let request = CallbackRequest::for_error("J1", "U1", "S1", "boom");
        assert_eq!(request.inference_time_ms, 0);
        assert!(request.output_image.is_none());
        assert_eq!(request.error.as_deref(), Some("boom"));
    }
}
