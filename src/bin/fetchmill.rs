//! CLI binary for fetchmill.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `PipelineConfig` plus one `JobDescriptor` and renders progress.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use fetchmill::{
    FileSink, ImageOutputFormat, JobDescriptor, JobLimits, MediaContainer, PageSelection,
    Pipeline, PipelineConfig, PipelineObserver, SourceRef, Stage, TargetSpec,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fetchmill",
    about = "Fetch a document or media resource, convert it, write the artifacts",
    version
)]
struct Cli {
    /// Source URL or local file path.
    source: String,

    /// Directory artifacts are written into.
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// What to produce from the source.
    #[arg(short = 'k', long, value_enum, default_value_t = Kind::Raster)]
    kind: Kind,

    /// Rendering DPI for PDF rasterisation.
    #[arg(long, default_value_t = 150)]
    dpi: u32,

    /// Page range for PDF rasterisation, e.g. "3" or "2-7". All pages if omitted.
    #[arg(long)]
    pages: Option<String>,

    /// Image output format for --kind image.
    #[arg(long, value_enum, default_value_t = ImgFormat::Png)]
    format: ImgFormat,

    /// Cap the longest image edge in pixels.
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Media container for --kind media.
    #[arg(long, value_enum, default_value_t = Container::Mp4)]
    container: Container,

    /// Audio bitrate in kbit/s.
    #[arg(long)]
    audio_bitrate: Option<u32>,

    /// Video bitrate in kbit/s.
    #[arg(long)]
    video_bitrate: Option<u32>,

    /// Drop the video stream (audio extraction).
    #[arg(long)]
    audio_only: bool,

    /// Abort the fetch after this many seconds.
    #[arg(long, default_value_t = 120)]
    fetch_timeout: u64,

    /// Abort the conversion after this many seconds.
    #[arg(long, default_value_t = 300)]
    convert_timeout: u64,

    /// Maximum source size in MiB.
    #[arg(long, default_value_t = 2048)]
    max_mib: u64,

    /// Concurrent range segments for large downloads.
    #[arg(long, default_value_t = 4)]
    segments: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    /// Rasterise PDF pages to PNG.
    Raster,
    /// Re-encode an image.
    Image,
    /// Re-encode audio/video via ffmpeg.
    Media,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImgFormat {
    Png,
    Jpeg,
    Webp,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Container {
    Mp4,
    Webm,
    Mkv,
    Mp3,
    Opus,
    Wav,
}

/// Terminal observer: one bar tracking fetch bytes, then stage messages.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_change(&self, _id: fetchmill::JobId, stage: Stage) {
        let prefix = match stage {
            Stage::Queued => "Queued",
            Stage::Fetching => "Fetching",
            Stage::Classifying => "Classifying",
            Stage::Converting => "Converting",
            Stage::Delivering => "Delivering",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        };
        self.bar.set_prefix(prefix);
        if stage.is_terminal() {
            self.bar.finish_and_clear();
        }
    }

    fn on_fetch_progress(&self, _id: fetchmill::JobId, fetched: u64, total: Option<u64>) {
        match total {
            Some(total) => self.bar.set_message(format!(
                "{:.1} / {:.1} MiB",
                fetched as f64 / (1024.0 * 1024.0),
                total as f64 / (1024.0 * 1024.0)
            )),
            None => self
                .bar
                .set_message(format!("{:.1} MiB", fetched as f64 / (1024.0 * 1024.0))),
        }
    }
}

fn parse_pages(spec: &str) -> Result<PageSelection> {
    if let Some((a, b)) = spec.split_once('-') {
        let start: usize = a.trim().parse().context("bad page range start")?;
        let end: usize = b.trim().parse().context("bad page range end")?;
        if start == 0 || end < start {
            bail!("page range must be 1-based and ascending, got '{spec}'");
        }
        Ok(PageSelection::Range(start, end))
    } else {
        let page: usize = spec.trim().parse().context("bad page number")?;
        if page == 0 {
            bail!("pages are 1-based");
        }
        Ok(PageSelection::Single(page))
    }
}

fn build_target(cli: &Cli) -> Result<TargetSpec> {
    Ok(match cli.kind {
        Kind::Raster => TargetSpec::PdfRaster {
            dpi: cli.dpi,
            pages: match &cli.pages {
                Some(spec) => parse_pages(spec)?,
                None => PageSelection::All,
            },
        },
        Kind::Image => TargetSpec::ImageTranscode {
            format: match cli.format {
                ImgFormat::Png => ImageOutputFormat::Png,
                ImgFormat::Jpeg => ImageOutputFormat::Jpeg,
                ImgFormat::Webp => ImageOutputFormat::WebP,
            },
            max_dimension: cli.max_dimension,
        },
        Kind::Media => TargetSpec::MediaTranscode {
            container: match cli.container {
                Container::Mp4 => MediaContainer::Mp4,
                Container::Webm => MediaContainer::Webm,
                Container::Mkv => MediaContainer::Mkv,
                Container::Mp3 => MediaContainer::Mp3,
                Container::Opus => MediaContainer::Opus,
                Container::Wav => MediaContainer::Wav,
            },
            video_bitrate_kbps: cli.video_bitrate,
            audio_bitrate_kbps: cli.audio_bitrate,
            audio_only: cli.audio_only,
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = build_target(&cli)?;

    let source = if cli.source.starts_with("http://") || cli.source.starts_with("https://") {
        SourceRef::Url(cli.source.clone())
    } else {
        SourceRef::LocalPath(PathBuf::from(&cli.source))
    };

    let observer = CliObserver::new();
    let config = PipelineConfig::builder()
        .concurrency(1)
        .fetch_segments(cli.segments)
        .observer(observer)
        .build()?;

    let pipeline = Pipeline::new(config, Arc::new(FileSink::new(&cli.output)));

    let descriptor = JobDescriptor::new(source, target).with_limits(JobLimits {
        max_bytes: cli.max_mib * 1024 * 1024,
        fetch_timeout: Duration::from_secs(cli.fetch_timeout),
        convert_timeout: Duration::from_secs(cli.convert_timeout),
    });
    let id = descriptor.id;

    let mut handle = pipeline.submit(descriptor)?;
    let status = handle.wait().await;
    pipeline.shutdown().await;

    match status.error {
        None => {
            println!("done: artifacts for job {id} in {}", cli.output.display());
            Ok(())
        }
        Some(err) => bail!("job {id} failed: {err}"),
    }
}
