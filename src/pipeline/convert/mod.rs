//! Conversion strategies, one per media class.
//!
//! Dispatch is a tagged-union match on the asset's sniffed
//! [`MediaClass`] — no trait hierarchy, just three strategy modules behind
//! one [`convert`] entry point:
//!
//! * [`pdf`]   — rasterise PDF pages via pdfium (`spawn_blocking`)
//! * [`image`] — decode / downscale / re-encode via the image crate
//! * [`media`] — audio/video re-encode through an external ffmpeg process
//!
//! The target spec is validated against the asset's kind *before* any
//! converter runs: an invalid spec never binds pdfium or spawns a process.
//! Converters write only into the owning job's scratch and keep no state
//! across jobs; the media converter is a separate OS process, so a crash
//! or hang there cannot corrupt sibling jobs.

pub mod image;
pub mod media;
pub mod pdf;

use crate::error::ConvertError;
use crate::output::ConversionResult;
use crate::pipeline::classify::{ContentKind, MediaClass};
use crate::scratch::{JobScratch, ScratchAsset};
use crate::target::TargetSpec;
use std::time::Duration;

/// Per-job converter context: where to write and which knobs apply.
///
/// Carries configuration, never converter state — converters are stateless
/// across jobs by construction.
pub struct ConvertContext<'a> {
    pub scratch: &'a JobScratch,
    pub jpeg_quality: u8,
    pub ffmpeg_program: &'a str,
    pub ffprobe_program: &'a str,
    pub timeout: Duration,
}

/// Check `target` against the asset's kind without doing any work.
pub fn validate(kind: ContentKind, target: &TargetSpec) -> Result<(), ConvertError> {
    match target {
        TargetSpec::PdfRaster { dpi, .. } => {
            if kind != ContentKind::Pdf {
                return Err(ConvertError::InvalidTargetSpec(format!(
                    "raster target requires a PDF input, got {kind:?}"
                )));
            }
            if *dpi < 72 || *dpi > 400 {
                return Err(ConvertError::InvalidTargetSpec(format!(
                    "DPI must be 72–400, got {dpi}"
                )));
            }
        }
        TargetSpec::ImageTranscode { max_dimension, .. } => {
            if kind.class() != MediaClass::Image {
                return Err(ConvertError::InvalidTargetSpec(format!(
                    "image target requires an image input, got {kind:?}"
                )));
            }
            if let Some(dim) = max_dimension {
                if *dim < 16 {
                    return Err(ConvertError::InvalidTargetSpec(format!(
                        "max_dimension must be ≥ 16, got {dim}"
                    )));
                }
            }
        }
        TargetSpec::MediaTranscode {
            container,
            video_bitrate_kbps,
            audio_bitrate_kbps,
            audio_only,
        } => {
            let class = kind.class();
            if class != MediaClass::Audio && class != MediaClass::Video {
                return Err(ConvertError::InvalidTargetSpec(format!(
                    "media target requires audio or video input, got {kind:?}"
                )));
            }
            if class == MediaClass::Audio && !container.is_audio_only() && !audio_only {
                return Err(ConvertError::InvalidTargetSpec(format!(
                    "audio input cannot fill a {container:?} video container"
                )));
            }
            for (name, rate) in [
                ("video_bitrate_kbps", video_bitrate_kbps),
                ("audio_bitrate_kbps", audio_bitrate_kbps),
            ] {
                if let Some(r) = rate {
                    if *r == 0 || *r > 100_000 {
                        return Err(ConvertError::InvalidTargetSpec(format!(
                            "{name} out of range: {r}"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Convert a classified asset to `target`, producing artifacts in scratch.
pub async fn convert(
    asset: &ScratchAsset,
    target: &TargetSpec,
    ctx: &ConvertContext<'_>,
) -> Result<ConversionResult, ConvertError> {
    let kind = asset.kind.ok_or_else(|| {
        ConvertError::InvalidTargetSpec("asset reached converter unclassified".into())
    })?;
    validate(kind, target)?;

    match target {
        TargetSpec::PdfRaster { dpi, pages } => pdf::rasterize(asset, *dpi, pages, ctx).await,
        TargetSpec::ImageTranscode {
            format,
            max_dimension,
        } => image::transcode(asset, *format, *max_dimension, ctx).await,
        TargetSpec::MediaTranscode {
            container,
            video_bitrate_kbps,
            audio_bitrate_kbps,
            audio_only,
        } => {
            media::transcode(
                asset,
                *container,
                *video_bitrate_kbps,
                *audio_bitrate_kbps,
                *audio_only || container.is_audio_only(),
                ctx,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ImageOutputFormat, MediaContainer, PageSelection};

    #[test]
    fn raster_requires_pdf() {
        let t = TargetSpec::PdfRaster {
            dpi: 150,
            pages: PageSelection::All,
        };
        assert!(validate(ContentKind::Pdf, &t).is_ok());
        assert!(validate(ContentKind::Png, &t).is_err());
    }

    #[test]
    fn raster_dpi_bounds() {
        for dpi in [71, 401] {
            let t = TargetSpec::PdfRaster {
                dpi,
                pages: PageSelection::All,
            };
            assert!(matches!(
                validate(ContentKind::Pdf, &t),
                Err(ConvertError::InvalidTargetSpec(_))
            ));
        }
    }

    #[test]
    fn image_target_rejects_audio_input() {
        let t = TargetSpec::ImageTranscode {
            format: ImageOutputFormat::Png,
            max_dimension: None,
        };
        assert!(validate(ContentKind::Jpeg, &t).is_ok());
        assert!(validate(ContentKind::Mp3, &t).is_err());
    }

    #[test]
    fn audio_into_video_container_needs_no_video() {
        let t = TargetSpec::MediaTranscode {
            container: MediaContainer::Mp4,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: None,
            audio_only: false,
        };
        assert!(validate(ContentKind::Mp3, &t).is_err());
        assert!(validate(ContentKind::Mp4, &t).is_ok());

        let audio_t = TargetSpec::MediaTranscode {
            container: MediaContainer::Mp3,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: Some(128),
            audio_only: false,
        };
        assert!(validate(ContentKind::Flac, &audio_t).is_ok());
    }

    #[test]
    fn zero_bitrate_is_invalid() {
        let t = TargetSpec::MediaTranscode {
            container: MediaContainer::Mp3,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: Some(0),
            audio_only: true,
        };
        assert!(validate(ContentKind::Mp3, &t).is_err());
    }
}
