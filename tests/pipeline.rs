//! End-to-end pipeline tests against local HTTP fixtures.
//!
//! Everything here runs hermetically: wiremock stands in for the origin
//! server (including a Range-aware responder for segmented fetches) and a
//! recording sink stands in for the external collaborator. The PDF and
//! ffmpeg converters need native tools, so their scenarios live at the
//! bottom behind the `E2E_ENABLED` environment variable.

use async_trait::async_trait;
use fetchmill::pipeline::fetch::{fetch, FetchOptions};
use fetchmill::scratch::JobScratch;
use fetchmill::{
    Delivery, DeliverError, DeliverySink, ImageOutputFormat, JobDescriptor, JobId, JobLimits,
    JobOutcome, MediaContainer, PageSelection, Pipeline, PipelineConfig, PipelineObserver,
    SourceRef, Stage, TargetSpec,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Serves `body` honouring `Range: bytes=a-b` with 206 + Content-Range.
struct RangeResponder {
    body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| {
                let (a, b) = v.split_once('-')?;
                Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?))
            });
        match range {
            Some((start, end)) if start <= end && end < self.body.len() => {
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Mount HEAD + ranged GET for `body` at `/file`.
async fn range_server(body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .append_header("accept-ranges", "bytes"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(RangeResponder { body })
        .mount(&server)
        .await;
    server
}

/// A small but real PNG for conversion scenarios.
fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba([120, 40, 200, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Png,
        )
        .unwrap();
    buf
}

/// Records every delivery; success payloads are read *inside* `deliver`
/// to prove artifacts outlive the sink call.
#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(JobId, Result<Vec<Vec<u8>>, String>)>>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliverError> {
        let record = match &delivery.outcome {
            JobOutcome::Success(result) => {
                let mut payloads = Vec::new();
                for asset in &result.outputs {
                    payloads.push(std::fs::read(&asset.path).map_err(|e| {
                        DeliverError::SinkUnreachable {
                            reason: e.to_string(),
                        }
                    })?);
                }
                Ok(payloads)
            }
            JobOutcome::Failure(err) => Err(err.to_string()),
        };
        self.deliveries
            .lock()
            .unwrap()
            .push((delivery.job_id, record));
        Ok(())
    }
}

/// Observer recording the order jobs entered Fetching.
#[derive(Default)]
struct StartOrder {
    order: Mutex<Vec<JobId>>,
}

impl PipelineObserver for StartOrder {
    fn on_stage_change(&self, id: JobId, stage: Stage) {
        if stage == Stage::Fetching {
            self.order.lock().unwrap().push(id);
        }
    }
}

fn image_target() -> TargetSpec {
    TargetSpec::ImageTranscode {
        format: ImageOutputFormat::Jpeg,
        max_dimension: None,
    }
}

fn quick_limits() -> JobLimits {
    JobLimits {
        max_bytes: 64 * 1024 * 1024,
        fetch_timeout: Duration::from_secs(20),
        convert_timeout: Duration::from_secs(20),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_job_reaches_done_with_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(40, 30)))
        .mount(&server)
        .await;

    let scratch_root = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder()
        .concurrency(1)
        .scratch_root(scratch_root.path())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, sink.clone());

    let mut handle = pipeline
        .submit(
            JobDescriptor::new(
                SourceRef::Url(format!("{}/pic", server.uri())),
                image_target(),
            )
            .with_limits(quick_limits()),
        )
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Done);
    assert_eq!(status.error, None);

    let deliveries = sink.deliveries.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    let payloads = deliveries[0].1.as_ref().unwrap();
    assert_eq!(payloads.len(), 1);
    // The artifact really is a JPEG, produced from the fetched PNG.
    assert_eq!(&payloads[0][..3], &[0xff, 0xd8, 0xff]);
    drop(deliveries);

    // Scratch is reclaimed on the success path too.
    let leftovers: Vec<_> = std::fs::read_dir(scratch_root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch leaked: {leftovers:?}");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn http_404_fails_with_fetch_error_and_no_scratch_leak() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let scratch_root = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder()
        .concurrency(1)
        .scratch_root(scratch_root.path())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, sink.clone());

    let mut handle = pipeline
        .submit(
            JobDescriptor::new(
                SourceRef::Url(format!("{}/missing", server.uri())),
                image_target(),
            )
            .with_limits(quick_limits()),
        )
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Failed);
    let err = status.error.unwrap();
    assert!(err.contains("unreachable"), "got: {err}");
    assert!(err.contains("404"), "got: {err}");

    // Failure reached the sink too.
    let deliveries = sink.deliveries.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].1.is_err());
    drop(deliveries);

    // Scratch was reclaimed before Failed became visible.
    let leftovers: Vec<_> = std::fs::read_dir(scratch_root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch leaked: {leftovers:?}");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn fifo_start_order_under_concurrency_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes(20, 20))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let order = Arc::new(StartOrder::default());
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder()
        .concurrency(1)
        .observer(order.clone())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, sink);

    let url = format!("{}/pic", server.uri());
    let mut first = pipeline
        .submit(
            JobDescriptor::new(SourceRef::Url(url.clone()), image_target())
                .with_limits(quick_limits()),
        )
        .unwrap();
    let mut second = pipeline
        .submit(
            JobDescriptor::new(SourceRef::Url(url), image_target()).with_limits(quick_limits()),
        )
        .unwrap();

    // The queued job must not start fetching before the first finishes.
    assert_eq!(first.wait().await.stage, Stage::Done);
    assert_eq!(second.wait().await.stage, Stage::Done);

    let started = order.order.lock().unwrap();
    assert_eq!(started.as_slice(), &[first.id(), second.id()]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_fetching_job_fails_with_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes(20, 20))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink);

    let mut handle = pipeline
        .submit(
            JobDescriptor::new(
                SourceRef::Url(format!("{}/slow", server.uri())),
                image_target(),
            )
            .with_limits(quick_limits()),
        )
        .unwrap();

    // Let the job reach Fetching, then cancel.
    for _ in 0..100 {
        if handle.status().stage == Stage::Fetching {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.status().stage, Stage::Fetching);
    handle.cancel();

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation must be observed promptly");
    assert_eq!(status.stage, Stage::Failed);
    assert!(status.error.unwrap().contains("cancelled"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_queued_job_never_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png_bytes(20, 20))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let order = Arc::new(StartOrder::default());
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder()
        .concurrency(1)
        .observer(order.clone())
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, sink);

    let url = format!("{}/pic", server.uri());
    let mut running = pipeline
        .submit(
            JobDescriptor::new(SourceRef::Url(url.clone()), image_target())
                .with_limits(quick_limits()),
        )
        .unwrap();
    let mut queued = pipeline
        .submit(
            JobDescriptor::new(SourceRef::Url(url), image_target()).with_limits(quick_limits()),
        )
        .unwrap();
    queued.cancel();

    assert_eq!(running.wait().await.stage, Stage::Done);
    let status = queued.wait().await;
    assert_eq!(status.stage, Stage::Failed);
    assert!(status.error.unwrap().contains("cancelled"));

    // The cancelled job never entered Fetching.
    assert_eq!(order.order.lock().unwrap().as_slice(), &[running.id()]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn segmented_fetch_matches_single_stream() {
    // Deterministic, compressible-resistant body.
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let server = range_server(body.clone()).await;
    let url = SourceRef::Url(format!("{}/file", server.uri()));
    let client = reqwest::Client::new();
    let limits = JobLimits::default();

    let segmented = FetchOptions {
        segments: 4,
        segment_min_bytes: 4 * 1024,
        retries: 1,
        retry_backoff_ms: 1,
    };
    let scratch_a = JobScratch::create(None, JobId::new()).unwrap();
    let a = fetch(&client, &url, &scratch_a, &limits, &segmented, &|_, _| {})
        .await
        .unwrap();

    let single = FetchOptions {
        segments: 1,
        ..segmented
    };
    let scratch_b = JobScratch::create(None, JobId::new()).unwrap();
    let b = fetch(&client, &url, &scratch_b, &limits, &single, &|_, _| {})
        .await
        .unwrap();

    let bytes_a = std::fs::read(&a.path).unwrap();
    let bytes_b = std::fs::read(&b.path).unwrap();
    assert_eq!(bytes_a, body, "segmented reassembly must be byte-exact");
    assert_eq!(bytes_a, bytes_b);
}

#[tokio::test]
async fn fetch_size_limit_is_enforced() {
    let body = vec![7u8; 50_000];
    let server = range_server(body).await;
    let client = reqwest::Client::new();
    let limits = JobLimits {
        max_bytes: 10_000,
        ..JobLimits::default()
    };
    let scratch = JobScratch::create(None, JobId::new()).unwrap();
    let err = fetch(
        &client,
        &SourceRef::Url(format!("{}/file", server.uri())),
        &scratch,
        &limits,
        &FetchOptions::default(),
        &|_, _| {},
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("size limit"), "got: {err}");
}

struct UnreachableSink;

#[async_trait]
impl DeliverySink for UnreachableSink {
    async fn deliver(&self, _delivery: &Delivery) -> Result<(), DeliverError> {
        Err(DeliverError::SinkUnreachable {
            reason: "always down".into(),
        })
    }
}

#[tokio::test]
async fn delivery_exhaustion_forces_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(16, 16)))
        .mount(&server)
        .await;

    let config = PipelineConfig::builder()
        .concurrency(1)
        .delivery_retries(1)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(config, Arc::new(UnreachableSink));

    let mut handle = pipeline
        .submit(
            JobDescriptor::new(
                SourceRef::Url(format!("{}/pic", server.uri())),
                image_target(),
            )
            .with_limits(quick_limits()),
        )
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Failed);
    assert!(status.error.unwrap().contains("delivery failed"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn status_queries_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(16, 16)))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink);

    assert!(pipeline.status(JobId::new()).is_none());
    assert!(!pipeline.cancel(JobId::new()));

    let mut handle = pipeline
        .submit(
            JobDescriptor::new(
                SourceRef::Url(format!("{}/pic", server.uri())),
                image_target(),
            )
            .with_limits(quick_limits()),
        )
        .unwrap();
    let id = handle.id();
    assert!(pipeline.status(id).is_some());

    handle.wait().await;
    // Terminal records stay queryable within the retention window.
    assert_eq!(pipeline.status(id).unwrap().stage, Stage::Done);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn submit_after_shutdown_is_refused() {
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink);
    pipeline.shutdown().await;

    let result = pipeline.submit(JobDescriptor::new(
        SourceRef::Bytes(vec![1, 2, 3]),
        image_target(),
    ));
    assert!(result.is_err());
}

#[tokio::test]
async fn unknown_bytes_fail_classification() {
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink.clone());

    let mut handle = pipeline
        .submit(JobDescriptor::new(
            SourceRef::Bytes(vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03]),
            image_target(),
        ))
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Failed);
    assert!(status.error.unwrap().contains("unrecognised"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn target_mismatch_fails_before_converting() {
    // A real PNG asked to become an MP4: invalid target for the kind.
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink);

    let mut handle = pipeline
        .submit(JobDescriptor::new(
            SourceRef::Bytes(png_bytes(16, 16)),
            TargetSpec::MediaTranscode {
                container: MediaContainer::Mp4,
                video_bitrate_kbps: None,
                audio_bitrate_kbps: None,
                audio_only: false,
            },
        ))
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Failed);
    assert!(status.error.unwrap().contains("invalid target spec"));

    pipeline.shutdown().await;
}

// ── Gated e2e scenarios (need native pdfium / ffmpeg) ────────────────────────

/// Skip unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    };
}

/// Minimal PCM WAV: 44-byte header plus `samples` bytes of silence.
fn wav_bytes(samples: usize) -> Vec<u8> {
    let data_len = samples as u32;
    let mut out = Vec::with_capacity(44 + samples);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&8000u32.to_le_bytes()); // sample rate
    out.extend_from_slice(&8000u32.to_le_bytes()); // byte rate
    out.extend_from_slice(&1u16.to_le_bytes()); // block align
    out.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + samples, 0x80);
    out
}

#[tokio::test]
async fn e2e_wav_transcodes_through_ffmpeg() {
    e2e_skip_unless_enabled!();

    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink.clone());

    let mut handle = pipeline
        .submit(JobDescriptor::new(
            SourceRef::Bytes(wav_bytes(8000)), // one second of silence
            TargetSpec::MediaTranscode {
                container: MediaContainer::Wav,
                video_bitrate_kbps: None,
                audio_bitrate_kbps: None,
                audio_only: true,
            },
        ))
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Done, "error: {:?}", status.error);

    let deliveries = sink.deliveries.lock().unwrap();
    let payloads = deliveries[0].1.as_ref().unwrap();
    assert_eq!(&payloads[0][..4], b"RIFF");

    drop(deliveries);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn e2e_pdf_rasterizes_selected_pages() {
    e2e_skip_unless_enabled!();
    let Ok(pdf_path) = std::env::var("FETCHMILL_E2E_PDF") else {
        println!("SKIP — set FETCHMILL_E2E_PDF to a local PDF");
        return;
    };

    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig::builder().concurrency(1).build().unwrap();
    let pipeline = Pipeline::new(config, sink.clone());

    let mut handle = pipeline
        .submit(JobDescriptor::new(
            SourceRef::LocalPath(pdf_path.into()),
            TargetSpec::PdfRaster {
                dpi: 150,
                pages: PageSelection::Range(1, 2),
            },
        ))
        .unwrap();

    let status = handle.wait().await;
    assert_eq!(status.stage, Stage::Done, "error: {:?}", status.error);

    let deliveries = sink.deliveries.lock().unwrap();
    let payloads = deliveries[0].1.as_ref().unwrap();
    assert!(!payloads.is_empty());
    for page in payloads {
        assert_eq!(&page[1..4], b"PNG");
    }

    drop(deliveries);
    pipeline.shutdown().await;
}
