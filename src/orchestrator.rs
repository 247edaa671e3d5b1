//! Per-job lifecycle: validate, execute, deliver, release.
//!
//! A job moves `Accepted -> Validating -> Running -> Delivering -> Released`
//! and always terminates in `Released`: the slot release rides a drop guard
//! so it happens on every path out of [`JobRunner::run`], including a panic
//! in a collaborator. Validation and engine failures are converted into an
//! error-outcome delivery and never escape the task.

use crate::callback::{CallbackClient, CallbackRequest};
use crate::config::InferenceDefaults;
use crate::engine::{EngineInputs, InferenceEngine};
use crate::image::JobWorkspace;
use crate::job::{JobError, JobOutcome, ResolvedParams, TryonJob};
use crate::metrics::Metrics;
use crate::scheduler::GpuScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lifecycle states, used for trace context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Validating,
    Running,
    Delivering,
    Released,
}

impl JobState {
    fn name(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Running => "running",
            Self::Delivering => "delivering",
            Self::Released => "released",
        }
    }
}

/// Frees the slot when dropped. `run` holds one for the whole job so the
/// release in the scheduler can never be skipped.
struct SlotGuard {
    scheduler: GpuScheduler,
    job_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.release(&self.job_id);
    }
}

/// Drives one accepted job to completion.
#[derive(Clone)]
pub struct JobRunner {
    scheduler: GpuScheduler,
    callback: CallbackClient,
    engine: Arc<dyn InferenceEngine>,
    defaults: InferenceDefaults,
    work_dir: PathBuf,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    #[must_use]
    pub fn new(
        scheduler: GpuScheduler,
        callback: CallbackClient,
        engine: Arc<dyn InferenceEngine>,
        defaults: InferenceDefaults,
        work_dir: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            scheduler,
            callback,
            engine,
            defaults,
            work_dir,
            metrics,
        }
    }

    /// Spawn the orchestrator for an already-accepted job.
    ///
    /// The handle is returned rather than detached so callers (and tests)
    /// can observe completion; the request boundary simply drops it.
    pub fn spawn(&self, job: TryonJob) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(job).await })
    }

    /// Run the full lifecycle for `job`. The caller must have won
    /// `accept(job_id)` beforehand.
    pub async fn run(&self, job: TryonJob) {
        let _slot = SlotGuard {
            scheduler: self.scheduler.clone(),
            job_id: job.job_id.clone(),
        };

        let mut workspace = None;
        let outcome = self.execute(&job, &mut workspace).await;

        match &outcome {
            JobOutcome::Success { elapsed_ms, .. } => {
                self.metrics.record_inference(*elapsed_ms);
                info!(
                    event = "job_completed",
                    job_id = %job.job_id,
                    inference_time_ms = elapsed_ms,
                    "inference completed"
                );
            }
            JobOutcome::Failed(err) => {
                self.metrics.record_error();
                error!(
                    event = "job_failed",
                    job_id = %job.job_id,
                    error = %err,
                    "job failed"
                );
            }
        }

        debug!(job_id = %job.job_id, state = JobState::Delivering.name(), "delivering outcome");
        let request = match &outcome {
            JobOutcome::Success {
                output_image,
                elapsed_ms,
            } => CallbackRequest {
                job_id: job.job_id.clone(),
                user_id: job.user_id.clone(),
                session_id: job.session_id.clone(),
                output_image: Some(output_image.clone()),
                inference_time_ms: *elapsed_ms,
                error: None,
                meta: None,
            },
            JobOutcome::Failed(err) => CallbackRequest::for_error(
                job.job_id.clone(),
                job.user_id.clone(),
                job.session_id.clone(),
                err.to_string(),
            ),
        };

        // Delivery failing does not reclassify the job; it is terminal for
        // the outcome and only logged (inside deliver).
        let report = self.callback.deliver(&request).await;
        if !report.success {
            self.metrics.record_callback_failure();
        }

        if let Some(workspace) = workspace.take() {
            workspace.cleanup().await;
        }
        debug!(job_id = %job.job_id, state = JobState::Released.name(), "job finished");
        // SlotGuard drops here and frees the slot.
    }

    /// Validate inputs and run the engine. Every failure is folded into a
    /// `JobOutcome::Failed`; nothing propagates.
    async fn execute(&self, job: &TryonJob, workspace_slot: &mut Option<JobWorkspace>) -> JobOutcome {
        debug!(job_id = %job.job_id, state = JobState::Validating.name(), "validating inputs");

        let workspace = match JobWorkspace::create(&self.work_dir, &job.job_id).await {
            Ok(workspace) => workspace,
            Err(err) => {
                return JobOutcome::Failed(JobError::EngineFailure(format!(
                    "failed to prepare job workspace: {err}"
                )))
            }
        };
        let workspace = workspace_slot.insert(workspace);

        let masked_path = match workspace
            .save_input("masked_person", &job.masked_user_image)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                return JobOutcome::Failed(JobError::ValidationFailed {
                    artifact: "masked_user_image".to_string(),
                    reason: err.to_string(),
                })
            }
        };
        let garment_path = match workspace.save_input("cloth", &job.garment_image).await {
            Ok(path) => path,
            Err(err) => {
                return JobOutcome::Failed(JobError::ValidationFailed {
                    artifact: "garment_image".to_string(),
                    reason: err.to_string(),
                })
            }
        };

        // The boundary gated on readiness at acceptance, but models can
        // drop out between then and now; fail fast instead of handing the
        // engine a job it cannot run.
        if !self.engine.is_ready().await {
            return JobOutcome::Failed(JobError::EngineNotReady);
        }

        let fresh_seed: u64 = rand::random();
        let params = ResolvedParams::resolve(&job.options, &self.defaults, fresh_seed);
        info!(
            job_id = %job.job_id,
            state = JobState::Running.name(),
            seed = params.seed,
            steps = params.steps,
            cfg = params.cfg,
            "inference started"
        );

        let output_path = workspace.output_path();
        let inputs = EngineInputs {
            masked_user_image: &masked_path,
            garment_image: &garment_path,
            output_path: &output_path,
        };
        match self.engine.infer(inputs, &params).await {
            Ok(output) => JobOutcome::Success {
                output_image: output.image,
                elapsed_ms: output.elapsed_ms,
            },
            Err(err) => JobOutcome::Failed(JobError::EngineFailure(err.to_string())),
        }
    }
}
