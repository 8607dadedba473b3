//! Retrieval of a job's source into scratch storage.
//!
//! ## Segmented fetch
//!
//! When the origin advertises a byte length and `Accept-Ranges: bytes`,
//! the body is split into up to `segments` contiguous ranges fetched
//! concurrently, each writing at its own offset of the preallocated final
//! file. The segment futures run inside the Fetching stage's own task via
//! `buffer_unordered` and are all joined before the stage completes, so a
//! job's extra connections never outlive its Fetching stage. Origins that
//! advertise no length or no range support fall back to a single stream.
//!
//! Writes go to disk incrementally, so partial progress survives a crash
//! of the surrounding process. A reassembled file whose length disagrees
//! with the advertised length is a typed [`FetchError::ReassemblyMismatch`],
//! never a silently truncated asset.
//!
//! ## Cancellation
//!
//! Every await point here is drop-safe; the runner races the stage future
//! against the job's cancellation token, so cancelling drops this future
//! at the next chunk boundary and scratch cleanup happens via the job's
//! [`JobScratch`].

use crate::error::FetchError;
use crate::job::{JobLimits, SourceRef};
use crate::scratch::{JobScratch, ScratchAsset};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Fetch tuning knobs, derived from [`crate::config::PipelineConfig`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Maximum concurrent segments for one fetch.
    pub segments: usize,
    /// Bodies smaller than twice this are fetched in one stream.
    pub segment_min_bytes: u64,
    /// Retry attempts per segment on transient failure.
    pub retries: u32,
    /// Initial backoff in milliseconds, doubling per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            segments: 4,
            segment_min_bytes: 8 * 1024 * 1024,
            retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Retrieve `source` into `scratch`, enforcing `limits`.
///
/// `progress` is called with (bytes so far, advertised total) as data
/// lands; it must be fast and non-blocking.
pub async fn fetch(
    client: &reqwest::Client,
    source: &SourceRef,
    scratch: &JobScratch,
    limits: &JobLimits,
    options: &FetchOptions,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    match source {
        SourceRef::Bytes(bytes) => materialize_bytes(bytes, scratch, limits, progress).await,
        SourceRef::LocalPath(path) => materialize_local(path, scratch, limits, progress).await,
        SourceRef::Url(url) => {
            let secs = limits.fetch_timeout.as_secs();
            tokio::time::timeout(
                limits.fetch_timeout,
                fetch_url(client, url, scratch, limits, options, progress),
            )
            .await
            .map_err(|_| FetchError::TimeLimitExceeded {
                url: url.clone(),
                secs,
            })?
        }
    }
}

/// Caller-held bytes: no network, but the size limit still applies.
async fn materialize_bytes(
    bytes: &[u8],
    scratch: &JobScratch,
    limits: &JobLimits,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    let len = bytes.len() as u64;
    if len > limits.max_bytes {
        return Err(FetchError::SizeLimitExceeded {
            limit: limits.max_bytes,
            actual: len,
        });
    }
    let path = scratch.file("input.bin");
    tokio::fs::write(&path, bytes).await?;
    progress(len, Some(len));
    Ok(ScratchAsset {
        path,
        len,
        kind: None,
    })
}

/// Local file: copied so the job owns its input like any other.
async fn materialize_local(
    src: &std::path::Path,
    scratch: &JobScratch,
    limits: &JobLimits,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|_| FetchError::SourceNotFound {
            path: src.to_path_buf(),
        })?;
    let len = meta.len();
    if len > limits.max_bytes {
        return Err(FetchError::SizeLimitExceeded {
            limit: limits.max_bytes,
            actual: len,
        });
    }
    let path = scratch.file(&filename_for(&src.to_string_lossy()));
    tokio::fs::copy(src, &path).await?;
    progress(len, Some(len));
    Ok(ScratchAsset {
        path,
        len,
        kind: None,
    })
}

async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    scratch: &JobScratch,
    limits: &JobLimits,
    options: &FetchOptions,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    info!(url, "fetch started");
    let path = scratch.file(&filename_for(url));

    // Probe for length and range support. HEAD failing is not fatal —
    // plenty of origins answer GET only — it just forces the fallback.
    let probe = probe_head(client, url).await;
    if let Some((len, ranges_ok)) = probe {
        if len > limits.max_bytes {
            return Err(FetchError::SizeLimitExceeded {
                limit: limits.max_bytes,
                actual: len,
            });
        }
        if ranges_ok && options.segments > 1 && len >= options.segment_min_bytes * 2 {
            return fetch_segmented(client, url, &path, len, options, progress).await;
        }
    }

    fetch_single(client, url, &path, limits, progress).await
}

/// HEAD the url; `Some((content_length, accept_ranges))` when it answered.
async fn probe_head(client: &reqwest::Client, url: &str) -> Option<(u64, bool)> {
    let resp = client.head(url).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let len = resp.content_length()?;
    let ranges_ok = resp
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);
    debug!(url, len, ranges_ok, "probe");
    Some((len, ranges_ok))
}

/// Plan contiguous `(start, end)` inclusive byte spans covering `[0, len)`.
fn plan_segments(len: u64, max_segments: usize, min_bytes: u64) -> Vec<(u64, u64)> {
    let by_size = (len / min_bytes).max(1);
    let n = (max_segments as u64).min(by_size).max(1);
    let base = len / n;
    let mut spans = Vec::with_capacity(n as usize);
    let mut start = 0;
    for i in 0..n {
        let end = if i == n - 1 { len - 1 } else { start + base - 1 };
        spans.push((start, end));
        start = end + 1;
    }
    spans
}

async fn fetch_segmented(
    client: &reqwest::Client,
    url: &str,
    path: &std::path::Path,
    len: u64,
    options: &FetchOptions,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    let spans = plan_segments(len, options.segments, options.segment_min_bytes);
    info!(url, len, segments = spans.len(), "segmented fetch");

    // Preallocate so each segment can seek to its own offset.
    let file = tokio::fs::File::create(path).await?;
    file.set_len(len).await?;
    drop(file);

    // The segment futures all run inside this task (no spawn), so they are
    // joined before the stage returns and dropped together on cancel.
    let done = AtomicU64::new(0);
    stream::iter(spans.into_iter().map(|(start, end)| {
        let done = &done;
        async move {
            fetch_segment_with_retry(client, url, path, start, end, options).await?;
            let so_far = done.fetch_add(end - start + 1, Ordering::Relaxed) + (end - start + 1);
            progress(so_far, Some(len));
            Ok::<(), FetchError>(())
        }
    }))
    .buffer_unordered(options.segments)
    .try_collect::<()>()
    .await?;

    let actual = tokio::fs::metadata(path).await?.len();
    if actual != len {
        return Err(FetchError::ReassemblyMismatch {
            expected: len,
            actual,
        });
    }

    Ok(ScratchAsset {
        path: path.to_path_buf(),
        len,
        kind: None,
    })
}

/// One segment, retried with exponential backoff on transient failure.
async fn fetch_segment_with_retry(
    client: &reqwest::Client,
    url: &str,
    path: &std::path::Path,
    start: u64,
    end: u64,
    options: &FetchOptions,
) -> Result<(), FetchError> {
    let mut last: Option<FetchError> = None;
    for attempt in 0..=options.retries {
        if attempt > 0 {
            let backoff = options.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(url, start, end, attempt, backoff_ms = backoff, "segment retry");
            sleep(Duration::from_millis(backoff)).await;
        }
        match fetch_segment(client, url, path, start, end).await {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => last = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| FetchError::Unreachable {
        url: url.to_string(),
        reason: "segment retries exhausted".into(),
    }))
}

/// Transient failures are worth retrying; client errors are not.
fn is_transient(e: &FetchError) -> bool {
    match e {
        FetchError::Unreachable { reason, .. } => !reason.starts_with("HTTP 4"),
        FetchError::ReassemblyMismatch { .. } | FetchError::Io(_) => true,
        _ => false,
    }
}

async fn fetch_segment(
    client: &reqwest::Client,
    url: &str,
    path: &std::path::Path,
    start: u64,
    end: u64,
) -> Result<(), FetchError> {
    let resp = client
        .get(url)
        .header(header::RANGE, format!("bytes={start}-{end}"))
        .send()
        .await
        .map_err(|e| FetchError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
        return Err(FetchError::Unreachable {
            url: url.to_string(),
            reason: format!("HTTP {} to range request", resp.status()),
        });
    }

    let expected = end - start + 1;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut written = 0u64;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        written += chunk.len() as u64;
        if written > expected {
            // Server sent more than the requested span; the offsets of
            // sibling segments would be clobbered.
            return Err(FetchError::ReassemblyMismatch {
                expected,
                actual: written,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written != expected {
        return Err(FetchError::ReassemblyMismatch {
            expected,
            actual: written,
        });
    }
    debug!(url, start, end, "segment done");
    Ok(())
}

/// Single-connection fallback for origins without length/range support.
async fn fetch_single(
    client: &reqwest::Client,
    url: &str,
    path: &std::path::Path,
    limits: &JobLimits,
    progress: &(dyn Fn(u64, Option<u64>) + Sync),
) -> Result<ScratchAsset, FetchError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !resp.status().is_success() {
        return Err(FetchError::Unreachable {
            url: url.to_string(),
            reason: format!("HTTP {}", resp.status()),
        });
    }

    let advertised = resp.content_length();
    if let Some(len) = advertised {
        if len > limits.max_bytes {
            return Err(FetchError::SizeLimitExceeded {
                limit: limits.max_bytes,
                actual: len,
            });
        }
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        written += chunk.len() as u64;
        // Without an advertised length the cap is enforced as bytes arrive.
        if written > limits.max_bytes {
            return Err(FetchError::SizeLimitExceeded {
                limit: limits.max_bytes,
                actual: written,
            });
        }
        file.write_all(&chunk).await?;
        progress(written, advertised);
    }
    file.flush().await?;

    if let Some(len) = advertised {
        if written != len {
            return Err(FetchError::ReassemblyMismatch {
                expected: len,
                actual: written,
            });
        }
    }

    info!(url, bytes = written, "fetch complete");
    Ok(ScratchAsset {
        path: path.to_path_buf(),
        len: written,
        kind: None,
    })
}

/// Derive a scratch filename from the source URL's last path segment.
///
/// The name is cosmetic — classification never looks at it — but a real
/// name makes scratch directories legible while debugging.
fn filename_for(url: &str) -> String {
    let tail = url
        .split('?')
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");
    let clean: String = tail
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if clean.is_empty() || clean.len() > 128 {
        "download.bin".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    #[test]
    fn segment_plan_covers_exactly() {
        for (len, max, min) in [
            (100u64, 4usize, 10u64),
            (1000, 4, 100),
            (7, 4, 1),
            (8 * 1024 * 1024 * 3, 4, 8 * 1024 * 1024),
        ] {
            let spans = plan_segments(len, max, min);
            assert!(spans.len() <= max);
            assert_eq!(spans[0].0, 0);
            assert_eq!(spans.last().unwrap().1, len - 1);
            for w in spans.windows(2) {
                assert_eq!(w[0].1 + 1, w[1].0, "spans must be contiguous");
            }
            let total: u64 = spans.iter().map(|(s, e)| e - s + 1).sum();
            assert_eq!(total, len);
        }
    }

    #[test]
    fn small_bodies_get_one_segment() {
        assert_eq!(plan_segments(100, 4, 1000).len(), 1);
    }

    #[test]
    fn filename_extraction() {
        assert_eq!(filename_for("https://x.test/a/report.pdf"), "report.pdf");
        assert_eq!(filename_for("https://x.test/v.mp4?token=abc"), "v.mp4");
        assert_eq!(filename_for("https://x.test/"), "download.bin");
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&FetchError::Unreachable {
            url: "u".into(),
            reason: "HTTP 503 to range request".into(),
        }));
        assert!(!is_transient(&FetchError::Unreachable {
            url: "u".into(),
            reason: "HTTP 404".into(),
        }));
        assert!(!is_transient(&FetchError::SizeLimitExceeded {
            limit: 1,
            actual: 2,
        }));
    }

    #[tokio::test]
    async fn inline_bytes_materialize() {
        let scratch = JobScratch::create(None, JobId::new()).unwrap();
        let client = reqwest::Client::new();
        let asset = fetch(
            &client,
            &SourceRef::Bytes(vec![1, 2, 3, 4]),
            &scratch,
            &JobLimits::default(),
            &FetchOptions::default(),
            &|_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(asset.len, 4);
        assert_eq!(std::fs::read(&asset.path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn inline_bytes_respect_size_limit() {
        let scratch = JobScratch::create(None, JobId::new()).unwrap();
        let client = reqwest::Client::new();
        let limits = JobLimits {
            max_bytes: 2,
            ..JobLimits::default()
        };
        let err = fetch(
            &client,
            &SourceRef::Bytes(vec![0; 10]),
            &scratch,
            &limits,
            &FetchOptions::default(),
            &|_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::SizeLimitExceeded { actual: 10, .. }));
    }

    #[tokio::test]
    async fn missing_local_source() {
        let scratch = JobScratch::create(None, JobId::new()).unwrap();
        let client = reqwest::Client::new();
        let err = fetch(
            &client,
            &SourceRef::LocalPath("/does/not/exist".into()),
            &scratch,
            &JobLimits::default(),
            &FetchOptions::default(),
            &|_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::SourceNotFound { .. }));
    }
}
