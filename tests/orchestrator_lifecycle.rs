//! Lifecycle guarantees: the slot is always freed, failures become error
//! callbacks, and temp files never outlive the run.

mod common;

use common::{asset_config, png_bytes, AssetServiceMock, MockEngine};
use std::sync::Arc;
use vton_node::callback::CallbackClient;
use vton_node::config::InferenceDefaults;
use vton_node::engine::InferenceEngine;
use vton_node::job::{InferenceOptions, TryonJob};
use vton_node::metrics::Metrics;
use vton_node::orchestrator::JobRunner;
use vton_node::scheduler::GpuScheduler;

struct Fixture {
    scheduler: GpuScheduler,
    runner: JobRunner,
    mock: AssetServiceMock,
    work_dir: tempfile::TempDir,
}

async fn fixture(engine: Arc<dyn InferenceEngine>) -> Fixture {
    let mock = AssetServiceMock::new();
    let url = mock.spawn().await;
    let scheduler = GpuScheduler::new();
    let work_dir = tempfile::tempdir().unwrap();
    let callback = CallbackClient::new(asset_config(url), "qwen-image-edit", "gpu-node-1", "2509");
    let runner = JobRunner::new(
        scheduler.clone(),
        callback,
        engine,
        InferenceDefaults::default(),
        work_dir.path().to_path_buf(),
        Metrics::new(),
    );
    Fixture {
        scheduler,
        runner,
        mock,
        work_dir,
    }
}

fn job(job_id: &str, masked: Vec<u8>, garment: Vec<u8>) -> TryonJob {
    TryonJob {
        job_id: job_id.to_string(),
        user_id: "U1".to_string(),
        session_id: "S1".to_string(),
        masked_user_image: masked,
        garment_image: garment,
        options: InferenceOptions::default(),
    }
}

fn workspace_entries(dir: &tempfile::TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn success_path_delivers_artifact_and_releases_slot() {
    let fx = fixture(MockEngine::succeeding()).await;
    assert!(fx.scheduler.accept("J1"));

    fx.runner
        .spawn(job("J1", png_bytes(), png_bytes()))
        .await
        .unwrap();

    let status = fx.scheduler.status();
    assert!(!status.busy);
    assert_eq!(status.queue_length, 0);

    let received = fx.mock.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].fields["job_id"], "J1");
    assert_eq!(received[0].fields["inference_time_ms"], "42");
    assert!(received[0].image_bytes > 0);
    assert!(!received[0].fields.contains_key("error"));

    assert_eq!(workspace_entries(&fx.work_dir), 0);
}

#[tokio::test]
async fn validation_failure_skips_engine_and_sends_error_callback() {
    let fx = fixture(MockEngine::failing("engine must not be called")).await;
    assert!(fx.scheduler.accept("J2"));

    fx.runner
        .spawn(job("J2", b"not an image".to_vec(), png_bytes()))
        .await
        .unwrap();

    assert!(!fx.scheduler.status().busy);
    let received = fx.mock.received.lock().clone();
    assert_eq!(received.len(), 1);
    let error = &received[0].fields["error"];
    assert!(error.contains("masked_user_image"), "got: {error}");
    // Validation failed, so the failing engine was never reached.
    assert!(!error.contains("engine must not be called"), "got: {error}");
    assert_eq!(received[0].image_bytes, 0);
    assert_eq!(received[0].fields["inference_time_ms"], "0");
    assert_eq!(workspace_entries(&fx.work_dir), 0);
}

#[tokio::test]
async fn engine_failure_becomes_error_outcome_without_escaping() {
    let fx = fixture(MockEngine::failing("device computation failed")).await;
    assert!(fx.scheduler.accept("J4"));

    // The join handle resolving Ok proves no panic escaped the task.
    fx.runner
        .spawn(job("J4", png_bytes(), png_bytes()))
        .await
        .unwrap();

    assert!(!fx.scheduler.status().busy);
    let received = fx.mock.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert!(received[0].fields["error"].contains("device computation failed"));
    assert_eq!(received[0].image_bytes, 0);
    assert_eq!(workspace_entries(&fx.work_dir), 0);
}

#[tokio::test]
async fn engine_not_ready_fails_with_distinct_error() {
    let fx = fixture(MockEngine::not_ready()).await;
    assert!(fx.scheduler.accept("J5"));

    fx.runner
        .spawn(job("J5", png_bytes(), png_bytes()))
        .await
        .unwrap();

    assert!(!fx.scheduler.status().busy);
    let received = fx.mock.received.lock().clone();
    assert!(received[0].fields["error"].contains("engine not ready"));
}

#[tokio::test]
async fn delivery_exhaustion_still_releases_the_slot() {
    let fx = fixture(MockEngine::succeeding()).await;
    fx.mock.script_statuses(&[500, 500, 500]);
    assert!(fx.scheduler.accept("J6"));

    fx.runner
        .spawn(job("J6", png_bytes(), png_bytes()))
        .await
        .unwrap();

    // Outcome was lost downstream, but the resource is not held hostage.
    let status = fx.scheduler.status();
    assert!(!status.busy);
    assert_eq!(status.queue_length, 0);
    assert_eq!(fx.mock.attempts(), 3);
    assert_eq!(workspace_entries(&fx.work_dir), 0);
}
