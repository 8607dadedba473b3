//! Error types for the fetchmill library.
//!
//! Each pipeline stage has its own error enum so callers can match on the
//! failure domain without string inspection:
//!
//! * [`FetchError`] — retrieval failed (unreachable source, limit blown,
//!   reassembly mismatch).
//! * [`ClassifyError`] — the fetched bytes match no known signature.
//! * [`ConvertError`] — the target spec was invalid or the converter
//!   crashed / timed out.
//! * [`DeliverError`] — the sink could not accept the finished job.
//!
//! [`JobError`] is the top-level union recorded on a failed job and handed
//! to the delivery sink. A stage that fails with something it cannot
//! meaningfully classify wraps it as [`JobError::Stage`] carrying the
//! origin stage, so the caller always learns *where* a job died even when
//! the *why* is opaque.

use crate::job::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while retrieving the source into scratch storage.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source could not be reached or answered with a non-success status.
    #[error("source unreachable: '{url}': {reason}")]
    Unreachable { url: String, reason: String },

    /// The resource is (or grew) larger than the per-job byte limit.
    #[error("size limit exceeded: {actual} bytes > {limit} byte limit")]
    SizeLimitExceeded { limit: u64, actual: u64 },

    /// The whole fetch did not finish within the per-job wall-clock limit.
    #[error("fetch timed out after {secs}s for '{url}'")]
    TimeLimitExceeded { url: String, secs: u64 },

    /// Segments joined but the reassembled file does not add up.
    ///
    /// Raised instead of silently returning a truncated asset when a
    /// segment delivered the wrong span or the final length disagrees with
    /// the length the server advertised.
    #[error("reassembly mismatch: expected {expected} bytes, got {actual}")]
    ReassemblyMismatch { expected: u64, actual: u64 },

    /// A local source path does not exist or is not readable.
    #[error("source file not found: '{path}'")]
    SourceNotFound { path: PathBuf },

    /// Scratch I/O failed while writing the asset.
    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while sniffing the content kind of a fetched asset.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// No signature in the table matched the asset's byte prefix.
    ///
    /// Carries the observed first bytes so the operator can see what the
    /// asset actually was.
    #[error("unrecognised content: first bytes {prefix:02x?}")]
    UnknownKind { prefix: Vec<u8> },

    /// The asset was too short to contain any known signature.
    #[error("asset too short to classify: {len} bytes")]
    TooShort { len: u64 },

    /// Reading the prefix from scratch failed.
    #[error("failed to read asset prefix: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while converting a classified asset to the target representation.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The target spec is malformed or does not apply to the asset's kind.
    ///
    /// Raised by validation *before* the underlying converter runs — an
    /// invalid spec never spawns a process or binds pdfium.
    #[error("invalid target spec: {0}")]
    InvalidTargetSpec(String),

    /// The external converter process exited non-zero.
    #[error("converter exited with {status}: {stderr_tail}")]
    ConverterCrashed { status: String, stderr_tail: String },

    /// The conversion did not finish within the per-job convert limit.
    #[error("conversion timed out after {secs}s")]
    ConverterTimeout { secs: u64 },

    /// The document is corrupt or password-protected and cannot be opened.
    #[error("document cannot be opened: {detail}")]
    BadDocument { detail: String },

    /// Selected pages exceed the document's page count.
    #[error("page selection empty or out of range (document has {total} pages)")]
    PageOutOfRange { total: usize },

    /// Decoding or encoding an image failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Scratch I/O failed while writing output artifacts.
    #[error("conversion I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while handing a finished job to the delivery sink.
#[derive(Debug, Error)]
pub enum DeliverError {
    /// The sink could not be reached; the attempt may be retried.
    #[error("delivery sink unreachable: {reason}")]
    SinkUnreachable { reason: String },

    /// The sink refused the artifact; retrying will not help.
    #[error("delivery sink rejected job: {reason}")]
    SinkRejected { reason: String },
}

/// The terminal error recorded on a failed [`crate::job::JobStatus`] and
/// surfaced through the delivery sink.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("delivery failed after {attempts} attempts: {source}")]
    Deliver {
        attempts: u32,
        #[source]
        source: DeliverError,
    },

    /// The job was cancelled by the caller. Distinct from every other
    /// failure: a cancelled job never reports Done and never disappears.
    #[error("job cancelled")]
    Cancelled,

    /// A stage failed in a way it could not classify (panicked worker,
    /// poisoned blocking task). The origin stage is preserved.
    #[error("{stage} stage failed: {detail}")]
    Stage { stage: Stage, detail: String },
}

impl JobError {
    /// The stage this error originated from.
    pub fn stage(&self) -> Stage {
        match self {
            JobError::Fetch(_) => Stage::Fetching,
            JobError::Classify(_) => Stage::Classifying,
            JobError::Convert(_) => Stage::Converting,
            JobError::Deliver { .. } => Stage::Delivering,
            JobError::Cancelled => Stage::Failed,
            JobError::Stage { stage, .. } => *stage,
        }
    }
}
