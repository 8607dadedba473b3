//! Delivery: handing terminal jobs back to the external collaborator.
//!
//! The [`DeliverySink`] trait is the narrow seam between the pipeline and
//! whatever consumes its artifacts — a chat handler uploading to a
//! messaging platform, an HTTP responder, or the bundled [`FileSink`]
//! that copies artifacts into a directory. The pipeline calls the sink
//! once per terminal job, retrying unreachable sinks with backoff;
//! implementations must be idempotent under repeats of the same job id.
//!
//! Scratch reclamation is sequenced by the runner: output paths inside a
//! [`crate::output::Delivery`] stay readable until `deliver` returns.

use crate::error::DeliverError;
use crate::output::{Delivery, JobOutcome};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Receives every terminal job exactly once from the pipeline's side
/// (with bounded redelivery on sink failure, hence the idempotency
/// requirement).
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Accept a finished job: either its artifacts or its error.
    ///
    /// Returning [`DeliverError::SinkUnreachable`] invites a retry;
    /// [`DeliverError::SinkRejected`] is terminal and fails the job
    /// immediately.
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliverError>;
}

/// Drive `sink.deliver` with bounded retries and exponential backoff.
///
/// Only `SinkUnreachable` is retried — a rejection will not change on the
/// next attempt. Returns the attempt count alongside the final error so
/// the job record can report how hard delivery was tried.
pub(crate) async fn deliver_with_retry(
    sink: &dyn DeliverySink,
    delivery: &Delivery,
    retries: u32,
    backoff_ms: u64,
) -> Result<(), (u32, DeliverError)> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match sink.deliver(delivery).await {
            Ok(()) => {
                debug!(job = %delivery.job_id, attempts, "delivered");
                return Ok(());
            }
            Err(e @ DeliverError::SinkRejected { .. }) => return Err((attempts, e)),
            Err(e) => {
                if attempts > retries {
                    return Err((attempts, e));
                }
                let backoff = backoff_ms * 2u64.pow(attempts - 1);
                warn!(job = %delivery.job_id, attempts, backoff_ms = backoff, "delivery retry: {e}");
                sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}

/// A sink that copies artifacts into a directory.
///
/// Success lands each output as `<jobid>-<n>-<name>`; failure lands a
/// `<jobid>.error.txt` describing what went wrong. Writes are atomic
/// (temp file + rename) so readers never observe a partial artifact, and
/// redelivery of the same job id simply overwrites — idempotent by
/// construction.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Copy `src` to `<dir>/<name>` atomically (temp file + rename).
    async fn place_copy(&self, name: &str, src: &std::path::Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dest = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::copy(src, &tmp).await?;
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(dest)
    }

    /// Write `text` to `<dir>/<name>` atomically.
    async fn place_text(&self, name: &str, text: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let dest = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(dest)
    }
}

#[async_trait]
impl DeliverySink for FileSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliverError> {
        let to_io_err = |e: std::io::Error| DeliverError::SinkUnreachable {
            reason: e.to_string(),
        };
        match &delivery.outcome {
            JobOutcome::Success(result) => {
                for (i, asset) in result.outputs.iter().enumerate() {
                    let base = asset
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("artifact");
                    let name = format!("{}-{:02}-{}", delivery.job_id, i, base);
                    self.place_copy(&name, &asset.path).await.map_err(to_io_err)?;
                }
            }
            JobOutcome::Failure(err) => {
                let name = format!("{}.error.txt", delivery.job_id);
                self.place_text(&name, &err.to_string())
                    .await
                    .map_err(to_io_err)?;
            }
        }
        Ok(())
    }
}
