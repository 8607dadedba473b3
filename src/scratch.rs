//! Per-job scratch storage.
//!
//! ## Why a TempDir per job?
//!
//! Converters (pdfium, ffmpeg) need file-system paths — they cannot stream
//! from byte buffers. Giving every job its own `TempDir` partitions scratch
//! so no two jobs ever write the same path, and guarantees reclamation
//! happens exactly once: dropping [`JobScratch`] removes the directory and
//! everything in it, even if the owning task panics. Error paths and the
//! success path free assets the same way — by dropping the scratch.

use crate::pipeline::classify::ContentKind;
use crate::job::JobId;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A locally materialised byte blob owned by one job.
///
/// The path always lives inside the owning job's [`JobScratch`]; the asset
/// is freed when the scratch is dropped, never individually.
#[derive(Debug, Clone)]
pub struct ScratchAsset {
    pub path: PathBuf,
    /// Byte length at creation time.
    pub len: u64,
    /// Sniffed content kind; `None` until the Classifying stage ran.
    pub kind: Option<ContentKind>,
}

impl ScratchAsset {
    /// Describe an existing file inside scratch.
    pub fn from_path(path: PathBuf) -> io::Result<Self> {
        let len = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            len,
            kind: None,
        })
    }
}

/// The scratch directory owned by exactly one job.
///
/// Created under the configured scratch root (or the system temp dir) with
/// a `fm-<jobid>` prefix so leaked directories are attributable during
/// debugging. Removal is automatic on drop.
pub struct JobScratch {
    dir: TempDir,
    id: JobId,
}

impl JobScratch {
    /// Create the scratch directory for `id` under `root`.
    pub fn create(root: Option<&Path>, id: JobId) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("fm-{id}-");
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(job = %id, path = %dir.path().display(), "scratch created");
        Ok(Self { dir, id })
    }

    /// The directory all of this job's assets live in.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path for a named file inside this scratch.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }
}

impl Drop for JobScratch {
    fn drop(&mut self) {
        debug!(job = %self.id, "scratch reclaimed");
    }
}
