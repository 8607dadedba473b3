//! Audio/video transcoding through an external ffmpeg process.
//!
//! ## Why a child process?
//!
//! ffmpeg is the one battle-tested implementation of every codec this
//! pipeline meets, and an OS process is the isolation boundary the job
//! model wants: a crash or runaway decode affects one child, not the
//! runtime. `kill_on_drop` ties the child's lifetime to the job — a
//! cancelled or timed-out job reaps its ffmpeg immediately.
//!
//! Duration metadata comes from ffprobe when available; a missing ffprobe
//! degrades to `None` metadata, never to a failed conversion.

use crate::error::ConvertError;
use crate::output::{ArtifactMetadata, ConversionResult};
use crate::pipeline::classify::ContentKind;
use crate::scratch::ScratchAsset;
use crate::target::MediaContainer;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::ConvertContext;

/// How much trailing stderr to keep when ffmpeg fails.
const STDERR_TAIL: usize = 400;

/// Re-encode `asset` into `container` via ffmpeg.
pub async fn transcode(
    asset: &ScratchAsset,
    container: MediaContainer,
    video_bitrate_kbps: Option<u32>,
    audio_bitrate_kbps: Option<u32>,
    strip_video: bool,
    ctx: &ConvertContext<'_>,
) -> Result<ConversionResult, ConvertError> {
    let output = ctx.scratch.file(&format!("output.{}", container.extension()));

    let mut cmd = Command::new(ctx.ffmpeg_program);
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(&asset.path);
    if strip_video {
        cmd.arg("-vn");
    }
    if let Some(v) = video_bitrate_kbps {
        cmd.arg("-b:v").arg(format!("{v}k"));
    }
    if let Some(a) = audio_bitrate_kbps {
        cmd.arg("-b:a").arg(format!("{a}k"));
    }
    cmd.arg(&output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(input = %asset.path.display(), ?container, "spawning ffmpeg");
    let child = cmd.spawn()?;

    // On timeout the future owning the child is dropped and kill_on_drop
    // reaps it; nothing of the job survives past this await.
    let out = match tokio::time::timeout(ctx.timeout, child.wait_with_output()).await {
        Ok(res) => res?,
        Err(_) => {
            return Err(ConvertError::ConverterTimeout {
                secs: ctx.timeout.as_secs(),
            })
        }
    };

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
        return Err(ConvertError::ConverterCrashed {
            status: out.status.to_string(),
            stderr_tail: stderr[tail_start..].trim().to_string(),
        });
    }

    let duration_ms = probe_duration(ctx.ffprobe_program, &output).await;

    let mut artifact = ScratchAsset::from_path(output)?;
    artifact.kind = Some(container_kind(container));

    info!(bytes = artifact.len, ?container, ?duration_ms, "media transcoded");
    let metadata = ArtifactMetadata {
        duration_ms,
        ..ArtifactMetadata::default()
    };
    Ok(ConversionResult {
        outputs: vec![artifact],
        metadata,
    })
}

/// The content kind a container's output will sniff as.
fn container_kind(container: MediaContainer) -> ContentKind {
    match container {
        MediaContainer::Mp4 => ContentKind::Mp4,
        MediaContainer::Webm | MediaContainer::Mkv => ContentKind::Matroska,
        MediaContainer::Mp3 => ContentKind::Mp3,
        MediaContainer::Opus => ContentKind::Ogg,
        MediaContainer::Wav => ContentKind::Wav,
    }
}

/// Ask ffprobe for the artifact's duration. Best-effort.
async fn probe_duration(ffprobe: &str, path: &std::path::Path) -> Option<u64> {
    let out = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !out.status.success() {
        warn!(path = %path.display(), "ffprobe failed; duration unknown");
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_slice(&out.stdout).ok()?;
    let secs: f64 = parsed
        .get("format")?
        .get("duration")?
        .as_str()?
        .parse()
        .ok()?;
    Some((secs * 1000.0) as u64)
}
