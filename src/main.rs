use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vton_node::callback::CallbackClient;
use vton_node::config::NodeConfig;
use vton_node::engine::{InferenceEngine, RemoteEngine};
use vton_node::metrics::Metrics;
use vton_node::orchestrator::JobRunner;
use vton_node::scheduler::GpuScheduler;
use vton_node::server::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node's YAML configuration file
    #[arg(long, default_value = "configs/config.yaml")]
    config: PathBuf,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,

    /// Set verbose mode (debug-level logging)
    #[arg(long)]
    verbose: bool,
}

fn init_logging(args: &Args, config: &NodeConfig) {
    let default_level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_deref().unwrap_or("info")
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Probe the engine sidecar until it reports its models loaded, then open
/// the node for traffic.
fn spawn_readiness_probe(state: AppState, engine: Arc<dyn InferenceEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            if engine.is_ready().await {
                state.mark_ready();
                info!(event = "models_loaded", "engine ready, accepting requests");
                return;
            }
            warn!("engine not ready yet, holding traffic");
        }
    });
}

// Request handling is cooperative on one thread; the GPU work lives in the
// engine sidecar, not in this process.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    init_logging(&args, &config);
    info!(
        event = "config_loaded",
        node_id = %config.server.node_id,
        "configuration loaded"
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    let config = Arc::new(config);
    let scheduler = GpuScheduler::new();
    let metrics = Metrics::new();
    let engine: Arc<dyn InferenceEngine> = Arc::new(RemoteEngine::new(&config.engine));
    let callback = CallbackClient::new(
        config.asset_service.clone(),
        config.model.model_type.clone(),
        config.server.node_id.clone(),
        config.model.model_version.clone(),
    );
    let runner = JobRunner::new(
        scheduler.clone(),
        callback,
        engine.clone(),
        config.inference.clone(),
        config.work_dir.clone(),
        metrics.clone(),
    );

    let state = AppState::new(config.clone(), scheduler, runner, engine.clone(), metrics);
    spawn_readiness_probe(state.clone(), engine);

    let app = build_router(state);
    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "vton-node listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
