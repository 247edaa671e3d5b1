//! HTTP request boundary: router assembly, shared state, readiness gate.

pub mod auth;
pub mod routes;

use crate::config::NodeConfig;
use crate::engine::InferenceEngine;
use crate::metrics::Metrics;
use crate::orchestrator::JobRunner;
use crate::scheduler::GpuScheduler;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{self, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Multipart uploads carry two images; cap well above typical payloads.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NodeConfig>,
    pub scheduler: GpuScheduler,
    pub runner: JobRunner,
    pub engine: Arc<dyn InferenceEngine>,
    pub metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Arc<NodeConfig>,
        scheduler: GpuScheduler,
        runner: JobRunner,
        engine: Arc<dyn InferenceEngine>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            scheduler,
            runner,
            engine,
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the engine has reported its models loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

/// Reject traffic until the engine is ready. `/health` stays reachable so
/// the fleet can tell "booting" from "gone".
async fn require_engine_ready(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "message": "Models are still loading. Please wait.",
                "node_id": state.config.server.node_id,
            })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Assemble the node's router.
pub fn build_router(state: AppState) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::any());

    let gated = Router::new()
        .route("/tryon", post(routes::tryon))
        .route("/gpu/status", get(routes::gpu_status))
        .route("/version", get(routes::version))
        .route("/metrics", get(routes::metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_engine_ready,
        ));

    Router::new()
        .merge(gated)
        .route("/health", get(routes::health))
        .layer(cors_layer)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
