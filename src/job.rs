//! Job data model: descriptors, stages, and status.
//!
//! A [`JobDescriptor`] is everything the pipeline needs to run one unit of
//! work, and it is immutable once submitted. The pipeline's mutable view of
//! a running job never leaves `runner`; what callers see is the cloneable
//! [`JobStatus`] projection published through a watch channel.

use crate::target::TargetSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Opaque unique job token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first uuid group is enough to correlate log lines.
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Where the job's input bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceRef {
    /// Remote resource fetched over HTTP(S).
    Url(String),
    /// Bytes already held by the caller (e.g. received over a chat upload).
    Bytes(Vec<u8>),
    /// File already on local disk; copied into scratch so the job owns it.
    LocalPath(PathBuf),
}

impl SourceRef {
    /// Short human-readable description for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            SourceRef::Url(u) => u.clone(),
            SourceRef::Bytes(b) => format!("<{} inline bytes>", b.len()),
            SourceRef::LocalPath(p) => p.display().to_string(),
        }
    }
}

/// Per-job resource caps. Defaults come from [`crate::config::PipelineConfig`]
/// when a descriptor does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLimits {
    /// Maximum input size in bytes.
    pub max_bytes: u64,
    /// Wall-clock budget for the whole Fetching stage.
    pub fetch_timeout: Duration,
    /// Wall-clock budget for the Converting stage.
    pub convert_timeout: Duration,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            // 2 GiB: large enough for feature-length video, small enough to
            // keep a single job from filling a typical scratch volume.
            max_bytes: 2 * 1024 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(120),
            convert_timeout: Duration::from_secs(300),
        }
    }
}

/// Admission priority. High drains before Normal; neither preempts a
/// running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// One unit of work, immutable once accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub source: SourceRef,
    pub target: TargetSpec,
    pub limits: JobLimits,
    pub priority: Priority,
}

impl JobDescriptor {
    /// Descriptor with a fresh id, default limits, and normal priority.
    pub fn new(source: SourceRef, target: TargetSpec) -> Self {
        Self {
            id: JobId::new(),
            source,
            target,
            limits: JobLimits::default(),
            priority: Priority::Normal,
        }
    }

    pub fn with_limits(mut self, limits: JobLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Phase of the per-job state machine.
///
/// Transitions are monotonic: `Queued → Fetching → Classifying → Converting
/// → Delivering → Done`, with any phase able to jump to `Failed`. Only
/// `Done` and `Failed` are terminal. Fetching may retry internally but
/// never re-enters once left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Queued,
    Fetching,
    Classifying,
    Converting,
    Delivering,
    Done,
    Failed,
}

impl Stage {
    /// Whether the job has reached an end state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Queued => "queued",
            Stage::Fetching => "fetching",
            Stage::Classifying => "classifying",
            Stage::Converting => "converting",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The caller-visible projection of a job: current stage plus the error
/// description once Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub stage: Stage,
    pub error: Option<String>,
}

impl JobStatus {
    pub(crate) fn queued() -> Self {
        Self {
            stage: Stage::Queued,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
