//! Shared fixtures: a mock asset service, mock engines, and payload helpers.

use async_trait::async_trait;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use vton_node::config::AssetServiceConfig;
use vton_node::engine::{EngineError, EngineInputs, EngineOutput, InferenceEngine};
use vton_node::job::ResolvedParams;

/// A valid-enough PNG payload for the magic-number sniffer.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

/// One callback the mock asset service received.
#[derive(Debug, Clone)]
pub struct ReceivedCallback {
    pub fields: HashMap<String, String>,
    pub image_bytes: usize,
    pub auth_header: Option<String>,
}

/// Mock asset service: records every callback and answers with the next
/// scripted status (empty script = always 200).
#[derive(Clone, Default)]
pub struct AssetServiceMock {
    pub received: Arc<Mutex<Vec<ReceivedCallback>>>,
    pub scripted_statuses: Arc<Mutex<VecDeque<u16>>>,
}

impl AssetServiceMock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_statuses(&self, statuses: &[u16]) {
        let mut scripted = self.scripted_statuses.lock();
        scripted.clear();
        scripted.extend(statuses.iter().copied());
    }

    pub fn attempts(&self) -> usize {
        self.received.lock().len()
    }

    pub async fn spawn(&self) -> String {
        let mock = self.clone();
        let app = Router::new()
            .route("/callback", post(handle_callback))
            .with_state(mock);
        let url = spawn_server(app).await;
        format!("{url}/callback")
    }
}

async fn handle_callback(
    State(mock): State<AssetServiceMock>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> StatusCode {
    let mut fields = HashMap::new();
    let mut image_bytes = 0;
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "output_image" {
            image_bytes = field.bytes().await.unwrap().len();
        } else {
            fields.insert(name, field.text().await.unwrap());
        }
    }
    let auth_header = headers
        .get("x-internal-auth")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mock.received.lock().push(ReceivedCallback {
        fields,
        image_bytes,
        auth_header,
    });
    let status = mock.scripted_statuses.lock().pop_front().unwrap_or(200);
    StatusCode::from_u16(status).unwrap()
}

/// Bind an ephemeral port and serve `app` in the background.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn asset_config(callback_url: String) -> AssetServiceConfig {
    AssetServiceConfig {
        callback_url,
        internal_auth_token: "callback-secret".to_string(),
        timeout_secs: 5,
        max_attempts: 3,
        retry_delay_ms: 50,
    }
}

/// How a mock engine behaves per job.
#[derive(Debug, Clone)]
pub enum EngineBehavior {
    /// Write an output image and report the given timing.
    Succeed { elapsed_ms: u64 },
    /// Fail with the given message.
    Fail(String),
    /// Sleep before succeeding, to keep the slot busy in admission tests.
    SlowSucceed { delay_ms: u64 },
}

pub struct MockEngine {
    pub ready: bool,
    pub behavior: EngineBehavior,
}

impl MockEngine {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            ready: true,
            behavior: EngineBehavior::Succeed { elapsed_ms: 42 },
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            ready: true,
            behavior: EngineBehavior::Fail(message.to_string()),
        })
    }

    pub fn not_ready() -> Arc<Self> {
        Arc::new(Self {
            ready: false,
            behavior: EngineBehavior::Succeed { elapsed_ms: 42 },
        })
    }

    pub fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            ready: true,
            behavior: EngineBehavior::SlowSucceed { delay_ms },
        })
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn is_ready(&self) -> bool {
        self.ready
    }

    async fn infer(
        &self,
        inputs: EngineInputs<'_>,
        _params: &ResolvedParams,
    ) -> Result<EngineOutput, EngineError> {
        match &self.behavior {
            EngineBehavior::Succeed { elapsed_ms } => {
                tokio::fs::write(inputs.output_path, png_bytes())
                    .await
                    .unwrap();
                Ok(EngineOutput {
                    image: inputs.output_path.to_path_buf(),
                    elapsed_ms: *elapsed_ms,
                })
            }
            EngineBehavior::Fail(message) => Err(EngineError::Transport(message.clone())),
            EngineBehavior::SlowSucceed { delay_ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                tokio::fs::write(inputs.output_path, png_bytes())
                    .await
                    .unwrap();
                Ok(EngineOutput {
                    image: inputs.output_path.to_path_buf(),
                    elapsed_ms: *delay_ms,
                })
            }
        }
    }
}
