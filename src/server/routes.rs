//! Route handlers for the try-on node.

use super::auth::{unauthorized, verify_internal_auth};
use super::AppState;
use crate::job::{InferenceOptions, TryonJob};
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct TryonResponse {
    pub job_id: String,
    pub status: String,
    pub node_id: String,
}

/// Fields collected from the `/tryon` multipart form.
#[derive(Default)]
struct TryonForm {
    job_id: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    provider: Option<String>,
    config: Option<String>,
    masked_user_image: Option<Vec<u8>>,
    garment_image: Option<Vec<u8>>,
}

impl TryonForm {
    async fn read(mut multipart: Multipart) -> Result<Self, String> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("malformed multipart body: {e}"))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "job_id" => form.job_id = Some(read_text(field, &name).await?),
                "user_id" => form.user_id = Some(read_text(field, &name).await?),
                "session_id" => form.session_id = Some(read_text(field, &name).await?),
                "provider" => form.provider = Some(read_text(field, &name).await?),
                "config" => form.config = Some(read_text(field, &name).await?),
                "masked_user_image" => {
                    form.masked_user_image = Some(read_bytes(field, &name).await?)
                }
                "garment_image" => form.garment_image = Some(read_bytes(field, &name).await?),
                _ => {}
            }
        }
        Ok(form)
    }

    fn require(self) -> Result<(String, String, String, String, Option<String>, Vec<u8>, Vec<u8>), String> {
        Ok((
            self.job_id.ok_or("missing field: job_id")?,
            self.user_id.ok_or("missing field: user_id")?,
            self.session_id.ok_or("missing field: session_id")?,
            self.provider.ok_or("missing field: provider")?,
            self.config,
            self.masked_user_image
                .ok_or("missing field: masked_user_image")?,
            self.garment_image.ok_or("missing field: garment_image")?,
        ))
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|e| format!("unreadable field {name}: {e}"))
}

async fn read_bytes(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<Vec<u8>, String> {
    field
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("unreadable field {name}: {e}"))
}

/// Accept a try-on job: auth, provider check, admission, spawn, 202.
///
/// Everything after acceptance is asynchronous; the caller learns the
/// outcome through the callback channel, or polls `/gpu/status`.
pub async fn tryon(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if !verify_internal_auth(&headers, &state.config.security.internal_auth_token) {
        return unauthorized();
    }

    let form = match TryonForm::read(multipart).await.and_then(TryonForm::require) {
        Ok(form) => form,
        Err(detail) => return bad_request(&detail),
    };
    let (job_id, user_id, session_id, provider, config, masked_user_image, garment_image) = form;

    let expected_provider = &state.config.model.model_type;
    if &provider != expected_provider {
        return bad_request(&format!(
            "Invalid provider: {provider}. Must be '{expected_provider}'"
        ));
    }

    info!(
        event = "request_received",
        job_id = %job_id,
        user_id = %user_id,
        session_id = %session_id,
        "tryon request received"
    );

    // Fast-path rejection; the accept() below is the authoritative check.
    if !state.scheduler.can_accept() {
        return busy_response(&job_id, &state.config.server.node_id);
    }
    if !state.scheduler.accept(&job_id) {
        // Lost the race between can_accept and accept.
        return busy_response(&job_id, &state.config.server.node_id);
    }

    let options = InferenceOptions::from_config_field(&job_id, config.as_deref());
    let job = TryonJob {
        job_id: job_id.clone(),
        user_id,
        session_id,
        masked_user_image,
        garment_image,
        options,
    };

    // The handle is intentionally dropped: the job owns its own lifecycle
    // from here and the slot guard guarantees release.
    let _handle = state.runner.spawn(job);

    (
        StatusCode::ACCEPTED,
        Json(TryonResponse {
            job_id,
            status: "ACCEPTED".to_string(),
            node_id: state.config.server.node_id.clone(),
        }),
    )
        .into_response()
}

/// Slot status for the fleet scheduler.
pub async fn gpu_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !verify_internal_auth(&headers, &state.config.security.internal_auth_token) {
        return unauthorized();
    }
    let status = state.scheduler.status();
    Json(json!({
        "node_id": state.config.server.node_id,
        "busy": status.busy,
        "current_job_id": status.current_job_id,
        "queue_length": status.queue_length,
    }))
    .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    // Live probe: a node can have booted (models loaded) and later lost its
    // engine sidecar; the fleet wants to see both.
    let gpu_available = state.engine.is_ready().await;
    Json(json!({
        "status": "ok",
        "gpu_available": gpu_available,
        "model_loaded": state.is_ready(),
        "node_id": state.config.server.node_id,
    }))
    .into_response()
}

pub async fn version(State(state): State<AppState>) -> Response {
    Json(json!({
        "model_type": state.config.model.model_type,
        "model_version": state.config.model.model_version,
        "backend": "engine-sidecar",
        "node_id": state.config.server.node_id,
    }))
    .into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

fn bad_request(detail: &str) -> Response {
    warn!(detail, "rejecting malformed tryon request");
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
}

fn busy_response(job_id: &str, node_id: &str) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "job_id": job_id,
            "status": "REJECTED_BUSY",
            "node_id": node_id,
            "message": "GPU is busy. Try another node.",
        })),
    )
        .into_response();
    let headers = response.headers_mut();
    headers.insert("Retry-After", HeaderValue::from_static("1"));
    if let Ok(value) = HeaderValue::from_str(node_id) {
        headers.insert("X-Node-Id", value);
    }
    response
}
