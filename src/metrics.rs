//! Plain in-process counters surfaced on `/metrics` as JSON.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Metrics {
    inference_count: AtomicU64,
    inference_errors_total: AtomicU64,
    last_inference_latency_ms: AtomicU64,
    callbacks_failed_total: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub vton_inference_count: u64,
    pub vton_inference_errors_total: u64,
    pub vton_inference_latency_ms: u64,
    pub vton_callbacks_failed_total: u64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_inference(&self, latency_ms: u64) {
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        self.last_inference_latency_ms
            .store(latency_ms, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inference_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failure(&self) {
        self.callbacks_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            vton_inference_count: self.inference_count.load(Ordering::Relaxed),
            vton_inference_errors_total: self.inference_errors_total.load(Ordering::Relaxed),
            vton_inference_latency_ms: self.last_inference_latency_ms.load(Ordering::Relaxed),
            vton_callbacks_failed_total: self.callbacks_failed_total.load(Ordering::Relaxed),
        }
    }
}
