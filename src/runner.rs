//! The job pipeline: admission, worker pool, and the per-job state machine.
//!
//! ## Scheduling model
//!
//! A fixed pool of `concurrency` worker tasks shares one two-band FIFO
//! queue (High drains before Normal, FIFO within a band). Each admitted
//! job occupies one worker for its whole Fetching→Delivering lifetime; a
//! submission beyond the bound waits in the queue in arrival order. The
//! queue mutex is the only process-wide shared synchronisation point.
//!
//! ## State machine
//!
//! `Queued → Fetching → Classifying → Converting → Delivering → Done`,
//! any stage `→ Failed`. Transitions are monotonic and published through
//! a per-job watch channel; a stage only starts once the prior stage's
//! output sits in scratch.
//!
//! ## Cancellation and cleanup
//!
//! Every stage future is raced against the job's `CancellationToken`, so
//! cancellation is observed at the next await point; ffmpeg children die
//! via `kill_on_drop`. A failed or cancelled job reclaims its scratch
//! *before* Failed is reported, and every terminal job — Done or Failed —
//! is announced to the delivery sink, so no outcome is silently dropped.

use crate::config::PipelineConfig;
use crate::error::{ConvertError, JobError};
use crate::job::{JobDescriptor, JobId, JobStatus, Priority, Stage};
use crate::output::{ConversionResult, Delivery, JobOutcome};
use crate::pipeline::convert::{self, ConvertContext};
use crate::pipeline::deliver::{deliver_with_retry, DeliverySink};
use crate::pipeline::{classify, fetch};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Submitting to a pipeline whose intake has been closed.
#[derive(Debug, Error)]
#[error("pipeline is shut down")]
pub struct ShutdownError;

/// Caller-side handle to one submitted job.
pub struct JobHandle {
    id: JobId,
    status_rx: watch::Receiver<JobStatus>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Current `{stage, error}` snapshot.
    pub fn status(&self) -> JobStatus {
        self.status_rx.borrow().clone()
    }

    /// Ask the job to stop. Best-effort: the active stage observes the
    /// request at its next await point and the job terminates as Failed
    /// with a cancellation error — never Done, never silently gone.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the job reaches Done or Failed and return that status.
    pub async fn wait(&mut self) -> JobStatus {
        loop {
            if self.status_rx.borrow().is_terminal() {
                return self.status_rx.borrow().clone();
            }
            // Sender dropped means the pipeline is gone; report last seen.
            if self.status_rx.changed().await.is_err() {
                return self.status_rx.borrow().clone();
            }
        }
    }
}

struct QueuedJob {
    descriptor: JobDescriptor,
    status_tx: watch::Sender<JobStatus>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobQueue {
    high: VecDeque<QueuedJob>,
    normal: VecDeque<QueuedJob>,
    closed: bool,
}

impl JobQueue {
    fn push(&mut self, job: QueuedJob) {
        match job.descriptor.priority {
            Priority::High => self.high.push_back(job),
            Priority::Normal => self.normal.push_back(job),
        }
    }

    fn pop(&mut self) -> Option<QueuedJob> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

struct RegistryEntry {
    status_rx: watch::Receiver<JobStatus>,
    cancel: CancellationToken,
    /// Set when the entry was first seen terminal; drives retention expiry.
    terminal_seen: Option<Instant>,
}

struct PipelineInner {
    config: PipelineConfig,
    client: reqwest::Client,
    sink: Arc<dyn DeliverySink>,
    queue: Mutex<JobQueue>,
    queue_notify: Notify,
    registry: Mutex<HashMap<JobId, RegistryEntry>>,
}

/// The job pipeline. One instance per runtime process; collaborators (a
/// web endpoint, a bot handler) share it as an `Arc<Pipeline>` and only
/// through [`Pipeline::submit`] / [`Pipeline::status`].
pub struct Pipeline {
    inner: Arc<PipelineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Start the worker pool with `config`, delivering through `sink`.
    pub fn new(config: PipelineConfig, sink: Arc<dyn DeliverySink>) -> Self {
        let inner = Arc::new(PipelineInner {
            client: reqwest::Client::new(),
            sink,
            queue: Mutex::new(JobQueue::default()),
            queue_notify: Notify::new(),
            registry: Mutex::new(HashMap::new()),
            config,
        });

        let shutdown = CancellationToken::new();
        let mut workers = Vec::with_capacity(inner.config.concurrency);
        for worker_id in 0..inner.config.concurrency {
            let inner = Arc::clone(&inner);
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(worker_loop(inner, shutdown, worker_id)));
        }
        info!(
            workers = inner.config.concurrency,
            "pipeline started: {}",
            serde_json::to_string(&inner.config.snapshot()).unwrap_or_default()
        );

        Self {
            inner,
            workers: Mutex::new(workers),
            shutdown,
        }
    }

    /// Accept a job. Returns immediately with a handle; the job runs when
    /// a worker frees up, in FIFO order within its priority band.
    pub fn submit(&self, descriptor: JobDescriptor) -> Result<JobHandle, ShutdownError> {
        let id = descriptor.id;
        let (status_tx, status_rx) = watch::channel(JobStatus::queued());
        let cancel = CancellationToken::new();

        // Register before the job becomes poppable so a status query can
        // never miss a job a worker already started.
        self.prune_registry();
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                RegistryEntry {
                    status_rx: status_rx.clone(),
                    cancel: cancel.clone(),
                    terminal_seen: None,
                },
            );

        {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.closed {
                self.inner
                    .registry
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                return Err(ShutdownError);
            }
            queue.push(QueuedJob {
                descriptor,
                status_tx,
                cancel: cancel.clone(),
            });
        }

        if let Some(obs) = &self.inner.config.observer {
            obs.on_job_admitted(id);
        }
        debug!(job = %id, "job admitted");
        self.inner.queue_notify.notify_one();

        Ok(JobHandle {
            id,
            status_rx,
            cancel,
        })
    }

    /// Status of any known job, or `None` once the record expired.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map(|e| e.status_rx.borrow().clone())
    }

    /// Request cancellation of a job by id. Returns whether the id was known.
    pub fn cancel(&self, id: JobId) -> bool {
        let registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        match registry.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Close intake and wait for in-flight jobs to finish.
    ///
    /// Queued jobs that have not started yet still run; only new
    /// submissions are refused.
    pub async fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.closed = true;
        }
        self.shutdown.cancel();
        self.inner.queue_notify.notify_waiters();
        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("worker join failed: {e}");
            }
        }
        info!("pipeline stopped");
    }

    /// Drop terminal registry entries older than the retention window.
    fn prune_registry(&self) {
        let retention = self.inner.config.status_retention;
        let mut registry = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        registry.retain(|_, entry| {
            if !entry.status_rx.borrow().is_terminal() {
                return true;
            }
            match entry.terminal_seen {
                Some(t) => now.duration_since(t) < retention,
                None => {
                    entry.terminal_seen = Some(now);
                    true
                }
            }
        });
    }
}

/// One worker: pop a job, run it start to finish, repeat.
///
/// Workers drain the queue even after shutdown is signalled — shutdown
/// closes intake, it does not abandon accepted work.
async fn worker_loop(inner: Arc<PipelineInner>, shutdown: CancellationToken, worker_id: usize) {
    debug!(worker_id, "worker started");
    loop {
        let next = inner.queue.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match next {
            Some(job) => run_job(&inner, job).await,
            None => {
                if shutdown.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = inner.queue_notify.notified() => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Race a stage future against the job's cancellation token.
async fn race<T, E>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, JobError>
where
    E: Into<JobError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Execute one job to its terminal state.
async fn run_job(inner: &Arc<PipelineInner>, job: QueuedJob) {
    let id = job.descriptor.id;
    let started = Instant::now();

    // Cancelled while still queued: terminate without fetching anything.
    if job.cancel.is_cancelled() {
        finish_failed(inner, &job, JobError::Cancelled).await;
        return;
    }

    let scratch = match crate::scratch::JobScratch::create(
        inner.config.scratch_root.as_deref(),
        id,
    ) {
        Ok(s) => s,
        Err(e) => {
            finish_failed(
                inner,
                &job,
                JobError::Stage {
                    stage: Stage::Fetching,
                    detail: format!("scratch creation failed: {e}"),
                },
            )
            .await;
            return;
        }
    };

    match run_stages(inner, &job, &scratch).await {
        Ok(result) => {
            set_stage(inner, &job, Stage::Delivering);
            let delivery = Delivery {
                job_id: id,
                outcome: JobOutcome::Success(result),
            };
            let delivered = deliver_with_retry(
                inner.sink.as_ref(),
                &delivery,
                inner.config.delivery_retries,
                inner.config.retry_backoff_ms,
            )
            .await;
            // Output assets were readable until the sink acknowledged (or
            // gave up); reclaim only now.
            drop(scratch);
            match delivered {
                Ok(()) => {
                    info!(job = %id, elapsed_ms = started.elapsed().as_millis() as u64, "job done");
                    finish(inner, &job, Stage::Done, None);
                }
                Err((attempts, e)) => {
                    let err = JobError::Deliver {
                        attempts,
                        source: e,
                    };
                    warn!(job = %id, "job failed: {err}");
                    finish(inner, &job, Stage::Failed, Some(err.to_string()));
                }
            }
        }
        Err(err) => {
            // Reclaim scratch before the failure becomes visible.
            drop(scratch);
            finish_failed(inner, &job, err).await;
        }
    }
}

/// Fetch → classify → convert, with stage bookkeeping.
async fn run_stages(
    inner: &Arc<PipelineInner>,
    job: &QueuedJob,
    scratch: &crate::scratch::JobScratch,
) -> Result<ConversionResult, JobError> {
    let descriptor = &job.descriptor;
    let id = descriptor.id;
    let limits = &descriptor.limits;

    set_stage(inner, job, Stage::Fetching);
    let options = fetch::FetchOptions {
        segments: inner.config.fetch_segments,
        segment_min_bytes: inner.config.segment_min_bytes,
        retries: inner.config.fetch_retries,
        retry_backoff_ms: inner.config.retry_backoff_ms,
    };
    let observer = inner.config.observer.clone();
    let progress = move |fetched: u64, total: Option<u64>| {
        if let Some(obs) = &observer {
            obs.on_fetch_progress(id, fetched, total);
        }
    };
    let fetched = race(
        &job.cancel,
        fetch::fetch(
            &inner.client,
            &descriptor.source,
            scratch,
            limits,
            &options,
            &progress,
        ),
    )
    .await?;

    set_stage(inner, job, Stage::Classifying);
    let classified = race(&job.cancel, classify::classify(&fetched)).await?;
    debug!(job = %id, kind = ?classified.kind, "classified");

    set_stage(inner, job, Stage::Converting);
    let ctx = ConvertContext {
        scratch,
        jpeg_quality: inner.config.jpeg_quality,
        ffmpeg_program: &inner.config.ffmpeg_program,
        ffprobe_program: &inner.config.ffprobe_program,
        timeout: limits.convert_timeout,
    };
    let convert_fut = async {
        match tokio::time::timeout(
            limits.convert_timeout,
            convert::convert(&classified, &descriptor.target, &ctx),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(ConvertError::ConverterTimeout {
                secs: limits.convert_timeout.as_secs(),
            }),
        }
    };
    let result = race(&job.cancel, convert_fut).await?;

    Ok(result)
}

/// Publish a (non-terminal) stage transition.
fn set_stage(inner: &PipelineInner, job: &QueuedJob, stage: Stage) {
    job.status_tx.send_replace(JobStatus { stage, error: None });
    if let Some(obs) = &inner.config.observer {
        obs.on_stage_change(job.descriptor.id, stage);
    }
    debug!(job = %job.descriptor.id, %stage, "stage");
}

/// Publish a terminal state and fire the observer.
fn finish(inner: &PipelineInner, job: &QueuedJob, stage: Stage, error: Option<String>) {
    let status = JobStatus { stage, error };
    job.status_tx.send_replace(status.clone());
    if let Some(obs) = &inner.config.observer {
        obs.on_stage_change(job.descriptor.id, stage);
        obs.on_job_terminal(job.descriptor.id, &status);
    }
}

/// Fail the job (scratch already reclaimed) and tell the sink about it.
async fn finish_failed(inner: &Arc<PipelineInner>, job: &QueuedJob, err: JobError) {
    let id = job.descriptor.id;
    warn!(job = %id, "job failed: {err}");
    let message = err.to_string();
    let delivery = Delivery {
        job_id: id,
        outcome: JobOutcome::Failure(err),
    };
    // Failures are announced through the same sink so no terminal outcome
    // is dropped; a sink that cannot even take the error is only logged.
    if let Err((attempts, e)) = deliver_with_retry(
        inner.sink.as_ref(),
        &delivery,
        inner.config.delivery_retries,
        inner.config.retry_backoff_ms,
    )
    .await
    {
        warn!(job = %id, attempts, "failure report undeliverable: {e}");
    }
    finish(inner, job, Stage::Failed, Some(message));
}
