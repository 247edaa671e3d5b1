//! vton-node: HTTP front for a single GPU-bound try-on inference resource.
//!
//! The node accepts at most one job at a time, runs it out-of-band against
//! an inference sidecar, and delivers the outcome to the asset service via
//! a retried multipart callback. Admission, lifecycle orchestration and
//! delivery are this crate's core; the inference engine itself is an
//! external collaborator behind the [`engine::InferenceEngine`] trait.

pub mod callback;
pub mod config;
pub mod engine;
pub mod image;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod server;

pub use callback::{CallbackClient, CallbackRequest, DeliveryReport};
pub use config::NodeConfig;
pub use engine::{EngineError, EngineInputs, EngineOutput, InferenceEngine, RemoteEngine};
pub use job::{InferenceOptions, JobError, JobOutcome, TryonJob};
pub use orchestrator::JobRunner;
pub use scheduler::{GpuScheduler, GpuStatus};
