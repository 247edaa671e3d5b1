//! Admission control for the single GPU slot.
//!
//! One mutex region covers the check-and-set in [`GpuScheduler::accept`],
//! the decrement in [`GpuScheduler::release`] and the snapshot in
//! [`GpuScheduler::status`], so two submissions racing for the slot can
//! never both win. There is no backlog and no fairness: a rejected caller
//! is expected to retry against another node.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Occupancy of the single inference slot. Lives for the whole process,
/// never persisted; a restart forgets any in-flight job by design.
#[derive(Debug, Default)]
struct SlotState {
    occupied: bool,
    current_job_id: Option<String>,
    /// Count of jobs admitted but not yet released. Mirrors `occupied`
    /// (0 or 1); kept as a counter so a mismatched release can still be
    /// accounted for without going negative.
    in_flight: u32,
}

/// Point-in-time snapshot for the fleet status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GpuStatus {
    pub busy: bool,
    pub current_job_id: Option<String>,
    pub queue_length: u32,
}

/// Gate in front of the single GPU resource.
///
/// Created once at startup and passed by handle to the request boundary
/// and the orchestrator; cloning shares the same slot.
#[derive(Clone, Default)]
pub struct GpuScheduler {
    state: Arc<Mutex<SlotState>>,
}

impl GpuScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advisory fast-path check. The result can be stale by the time the
    /// caller acts on it; only [`accept`](Self::accept) decides admission.
    #[must_use]
    pub fn can_accept(&self) -> bool {
        !self.state.lock().occupied
    }

    /// Atomically claim the slot for `job_id`. Returns false without any
    /// mutation when the slot is already held.
    pub fn accept(&self, job_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.occupied {
            info!(
                event = "job_rejected_busy",
                job_id,
                current_job_id = state.current_job_id.as_deref(),
                "slot busy, rejecting job"
            );
            return false;
        }
        state.occupied = true;
        state.current_job_id = Some(job_id.to_string());
        state.in_flight += 1;
        info!(event = "job_accepted", job_id, "job accepted, slot busy");
        true
    }

    /// Free the slot after a job has fully finished, cleanup included.
    ///
    /// A `job_id` that does not match the recorded occupant means an
    /// earlier bug or an out-of-order release; the slot is freed and the
    /// counter floored anyway so the resource is never held hostage.
    pub fn release(&self, job_id: &str) {
        let mut state = self.state.lock();
        if state.current_job_id.as_deref() == Some(job_id) {
            info!(event = "job_released", job_id, "job released, slot free");
        } else {
            warn!(
                event = "slot_release_mismatch",
                job_id,
                current_job_id = state.current_job_id.as_deref(),
                "released job does not match slot occupant"
            );
        }
        state.occupied = false;
        state.current_job_id = None;
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Consistent snapshot of the slot, possibly stale once returned.
    #[must_use]
    pub fn status(&self) -> GpuStatus {
        let state = self.state.lock();
        GpuStatus {
            busy: state.occupied,
            current_job_id: state.current_job_id.clone(),
            queue_length: state.in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn accept_claims_the_slot() {
        let scheduler = GpuScheduler::new();
        assert!(scheduler.can_accept());
        assert!(scheduler.accept("J1"));
        assert!(!scheduler.can_accept());
        let status = scheduler.status();
        assert!(status.busy);
        assert_eq!(status.current_job_id.as_deref(), Some("J1"));
        assert_eq!(status.queue_length, 1);
    }

    #[test]
    fn busy_slot_rejects_until_released() {
        let scheduler = GpuScheduler::new();
        assert!(scheduler.accept("J1"));
        assert!(!scheduler.accept("J2"));
        scheduler.release("J1");
        assert!(scheduler.accept("J3"));
        assert_eq!(
            scheduler.status().current_job_id.as_deref(),
            Some("J3")
        );
    }

    #[test]
    fn release_with_mismatched_job_still_frees_the_slot() {
        let scheduler = GpuScheduler::new();
        assert!(scheduler.accept("J1"));
        scheduler.release("other-job");
        let status = scheduler.status();
        assert!(!status.busy);
        assert_eq!(status.current_job_id, None);
        assert_eq!(status.queue_length, 0);
    }

    #[test]
    fn release_on_empty_slot_floors_counter_at_zero() {
        let scheduler = GpuScheduler::new();
        scheduler.release("ghost");
        scheduler.release("ghost");
        assert_eq!(scheduler.status().queue_length, 0);
        assert!(scheduler.accept("J1"));
    }

    #[test]
    fn concurrent_accepts_have_exactly_one_winner() {
        let scheduler = GpuScheduler::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.accept(&format!("job-{i}")))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(scheduler.status().queue_length, 1);
    }

    #[test]
    fn duplicate_job_ids_never_go_negative_or_double_release() {
        let scheduler = GpuScheduler::new();
        let accepts: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.accept("dup"))
            })
            .map(|h| h.join().unwrap())
            .collect();
        assert_eq!(accepts.iter().filter(|&&won| won).count(), 1);
        scheduler.release("dup");
        scheduler.release("dup");
        let status = scheduler.status();
        assert_eq!(status.queue_length, 0);
        assert!(!status.busy);
    }
}
