//! Observer trait for stage-transition events.
//!
//! Inject an `Arc<dyn PipelineObserver>` via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as
//! jobs move through the pipeline.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a metrics
//! counter, or a terminal progress bar without the library knowing how the
//! host application communicates. The trait is `Send + Sync` because
//! worker tasks fire events concurrently.
//!
//! Callbacks run synchronously on the worker that owns the job; stage
//! execution never waits on event consumption, so implementations must
//! return quickly and must not block.

use crate::job::{JobId, JobStatus, Stage};

/// Called by the pipeline as jobs progress.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Methods may be called concurrently from different worker tasks.
/// Implementations must protect shared mutable state with appropriate
/// synchronisation primitives (e.g. `Mutex`, `AtomicUsize`).
pub trait PipelineObserver: Send + Sync {
    /// A job was accepted and queued.
    fn on_job_admitted(&self, id: JobId) {
        let _ = id;
    }

    /// A job entered a new stage.
    fn on_stage_change(&self, id: JobId, stage: Stage) {
        let _ = (id, stage);
    }

    /// Bytes arrived during the Fetching stage.
    ///
    /// `total` is `None` when the source does not advertise a length.
    fn on_fetch_progress(&self, id: JobId, fetched: u64, total: Option<u64>) {
        let _ = (id, fetched, total);
    }

    /// A job reached Done or Failed.
    fn on_job_terminal(&self, id: JobId, status: &JobStatus) {
        let _ = (id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        stages: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_stage_change(&self, _id: JobId, _stage: Stage) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_are_noops() {
        let obs = Counting {
            stages: AtomicUsize::new(0),
        };
        let id = JobId::new();
        obs.on_job_admitted(id);
        obs.on_fetch_progress(id, 10, Some(100));
        obs.on_stage_change(id, Stage::Fetching);
        assert_eq!(obs.stages.load(Ordering::SeqCst), 1);
    }
}
