//! Conversion outputs and the payload handed to the delivery sink.

use crate::error::JobError;
use crate::job::JobId;
use crate::scratch::ScratchAsset;
use serde::Serialize;

/// What a converter produced for one job.
///
/// Ownership of the output assets transfers to the delivery sink: the
/// pipeline keeps the job's scratch alive until the sink acknowledges, so
/// every `ScratchAsset` path here is readable inside `deliver`. After
/// acknowledgment the scratch (and the paths with it) is reclaimed — sinks
/// that need the bytes later must copy them out.
#[derive(Debug)]
pub struct ConversionResult {
    /// Output artifacts in order (one per page for rasterisation, a single
    /// entry for transcodes).
    pub outputs: Vec<ScratchAsset>,
    pub metadata: ArtifactMetadata,
}

/// Descriptive metadata about the produced artifact(s).
///
/// Every field is optional: a PDF rasterisation has a page count but no
/// duration; a media transcode has a duration but no dimensions; a probe
/// tool being unavailable degrades to `None`, never to failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactMetadata {
    pub page_count: Option<usize>,
    pub duration_ms: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Terminal outcome of a job as the sink sees it.
#[derive(Debug)]
pub enum JobOutcome {
    /// Conversion succeeded; artifacts are readable until `deliver` returns.
    Success(ConversionResult),
    /// The job failed; the sink receives the originating error so no
    /// failure is silently dropped.
    Failure(JobError),
}

/// One delivery handed to [`crate::pipeline::deliver::DeliverySink::deliver`].
///
/// The pipeline invokes the sink once per terminal job (with bounded
/// retries on sink failure), so implementations must be idempotent for
/// repeats of the same `job_id`.
#[derive(Debug)]
pub struct Delivery {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success(_))
    }
}
