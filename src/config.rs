//! Pipeline configuration.
//!
//! All runtime behaviour is controlled through one [`PipelineConfig`],
//! built via its [`PipelineConfigBuilder`], read once at startup and
//! immutable for the pipeline's lifetime. Keeping every knob in one struct
//! makes it trivial to log a run's configuration and diff two deployments.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new
//! field. The builder lets callers set only what they care about and rely
//! on documented defaults for the rest.

use crate::job::JobLimits;
use crate::observer::PipelineObserver;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::Pipeline`].
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use fetchmill::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(2)
///     .fetch_segments(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks — the concurrency bound for admitted jobs.
    /// Default: 4.
    ///
    /// Each job occupies one worker for its whole Fetching→Delivering
    /// lifetime; submissions beyond the bound queue FIFO until a worker
    /// frees up.
    pub concurrency: usize,

    /// Default per-job limits applied when a descriptor does not override
    /// them. Default: 2 GiB / 120 s fetch / 300 s convert.
    pub default_limits: JobLimits,

    /// Root directory for per-job scratch. `None` uses the system temp dir.
    ///
    /// Every job gets its own directory under this root; no two jobs ever
    /// write the same path.
    pub scratch_root: Option<PathBuf>,

    /// Maximum concurrent range segments within one fetch. Default: 4.
    ///
    /// Segments are short-lived tasks joined before the Fetching stage
    /// completes, so total in-flight connections are bounded by
    /// `concurrency * fetch_segments`.
    pub fetch_segments: usize,

    /// Do not segment bodies smaller than twice this. Default: 8 MiB.
    ///
    /// Below that, connection setup costs more than parallelism saves.
    pub segment_min_bytes: u64,

    /// Retry attempts per fetch segment on transient failure. Default: 3.
    pub fetch_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff).
    /// Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids a thundering herd when several segments retry against a
    /// recovering origin at once.
    pub retry_backoff_ms: u64,

    /// Delivery attempts before a job is forced to Failed. Default: 3.
    pub delivery_retries: u32,

    /// How long terminal jobs stay queryable via [`crate::Pipeline::status`]
    /// before being pruned. Default: 300 s.
    pub status_retention: Duration,

    /// Default rendering DPI for PDF rasterisation. Range 72–400.
    /// Default: 150.
    pub default_dpi: u32,

    /// JPEG quality for image transcodes, 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// Program name or path for the ffmpeg binary. Default: "ffmpeg".
    ///
    /// Overridable so deployments can pin an absolute path and tests can
    /// point at a stub.
    pub ffmpeg_program: String,

    /// Program name or path for ffprobe. Default: "ffprobe".
    pub ffprobe_program: String,

    /// Observer for stage-transition events. Callbacks must be fast; they
    /// run on the worker that owns the job.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_limits: JobLimits::default(),
            scratch_root: None,
            fetch_segments: 4,
            segment_min_bytes: 8 * 1024 * 1024,
            fetch_retries: 3,
            retry_backoff_ms: 500,
            delivery_retries: 3,
            status_retention: Duration::from_secs(300),
            default_dpi: 150,
            jpeg_quality: 85,
            ffmpeg_program: "ffmpeg".to_string(),
            ffprobe_program: "ffprobe".to_string(),
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("default_limits", &self.default_limits)
            .field("scratch_root", &self.scratch_root)
            .field("fetch_segments", &self.fetch_segments)
            .field("segment_min_bytes", &self.segment_min_bytes)
            .field("fetch_retries", &self.fetch_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("delivery_retries", &self.delivery_retries)
            .field("status_retention", &self.status_retention)
            .field("default_dpi", &self.default_dpi)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("ffmpeg_program", &self.ffmpeg_program)
            .field("ffprobe_program", &self.ffprobe_program)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Loggable snapshot of the numeric knobs (observer elided).
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            concurrency: self.concurrency,
            fetch_segments: self.fetch_segments,
            segment_min_bytes: self.segment_min_bytes,
            fetch_retries: self.fetch_retries,
            delivery_retries: self.delivery_retries,
            default_dpi: self.default_dpi,
        }
    }
}

/// Serialisable subset of [`PipelineConfig`] for structured log records.
#[derive(Debug, Serialize)]
pub struct ConfigSnapshot {
    pub concurrency: usize,
    pub fetch_segments: usize,
    pub segment_min_bytes: u64,
    pub fetch_retries: u32,
    pub delivery_retries: u32,
    pub default_dpi: u32,
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn default_limits(mut self, limits: JobLimits) -> Self {
        self.config.default_limits = limits;
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(root.into());
        self
    }

    pub fn fetch_segments(mut self, n: usize) -> Self {
        self.config.fetch_segments = n.clamp(1, 16);
        self
    }

    pub fn segment_min_bytes(mut self, bytes: u64) -> Self {
        self.config.segment_min_bytes = bytes.max(64 * 1024);
        self
    }

    pub fn fetch_retries(mut self, n: u32) -> Self {
        self.config.fetch_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn delivery_retries(mut self, n: u32) -> Self {
        self.config.delivery_retries = n.max(1);
        self
    }

    pub fn status_retention(mut self, d: Duration) -> Self {
        self.config.status_retention = d;
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn ffmpeg_program(mut self, program: impl Into<String>) -> Self {
        self.config.ffmpeg_program = program.into();
        self
    }

    pub fn ffprobe_program(mut self, program: impl Into<String>) -> Self {
        self.config.ffprobe_program = program.into();
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ConfigError("concurrency must be ≥ 1".into()));
        }
        if c.default_dpi < 72 || c.default_dpi > 400 {
            return Err(ConfigError(format!(
                "default DPI must be 72–400, got {}",
                c.default_dpi
            )));
        }
        if c.default_limits.max_bytes == 0 {
            return Err(ConfigError("max_bytes must be non-zero".into()));
        }
        Ok(self.config)
    }
}

/// Builder validation failure.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
