//! Image transcoding: decode, optionally downscale, re-encode.
//!
//! Decoding and encoding are CPU-bound, so the whole transcode runs in
//! `spawn_blocking`. Downscaling uses Lanczos3 — slower than nearest but
//! the artifact is the product here, so resampling quality wins.

use crate::error::ConvertError;
use crate::output::{ArtifactMetadata, ConversionResult};
use crate::pipeline::classify::ContentKind;
use crate::scratch::ScratchAsset;
use crate::target::ImageOutputFormat;
use image::imageops::FilterType;
use image::ImageReader;
use std::io::BufWriter;
use tracing::{debug, info};

use super::ConvertContext;

/// Re-encode `asset` as `format`, downscaling to `max_dimension` if set.
pub async fn transcode(
    asset: &ScratchAsset,
    format: ImageOutputFormat,
    max_dimension: Option<u32>,
    ctx: &ConvertContext<'_>,
) -> Result<ConversionResult, ConvertError> {
    let input = asset.path.clone();
    let output = ctx.scratch.file(&format!("output.{}", format.extension()));
    let out_path = output.clone();
    let jpeg_quality = ctx.jpeg_quality;

    let (width, height) = tokio::task::spawn_blocking(move || {
        transcode_blocking(&input, &out_path, format, max_dimension, jpeg_quality)
    })
    .await
    .map_err(|e| ConvertError::BadDocument {
        detail: format!("transcode task panicked: {e}"),
    })??;

    let mut out = ScratchAsset::from_path(output)?;
    out.kind = Some(match format {
        ImageOutputFormat::Png => ContentKind::Png,
        ImageOutputFormat::Jpeg => ContentKind::Jpeg,
        ImageOutputFormat::WebP => ContentKind::WebP,
    });

    info!(width, height, ?format, bytes = out.len, "image transcoded");
    let metadata = ArtifactMetadata {
        width: Some(width),
        height: Some(height),
        ..ArtifactMetadata::default()
    };
    Ok(ConversionResult {
        outputs: vec![out],
        metadata,
    })
}

/// Blocking implementation of the decode → resize → encode chain.
fn transcode_blocking(
    input: &std::path::Path,
    output: &std::path::Path,
    format: ImageOutputFormat,
    max_dimension: Option<u32>,
    jpeg_quality: u8,
) -> Result<(u32, u32), ConvertError> {
    // Guess from content, not extension — the scratch filename came from
    // an untrusted URL.
    let mut img = ImageReader::open(input)?.with_guessed_format()?.decode()?;

    if let Some(cap) = max_dimension {
        if img.width() > cap || img.height() > cap {
            debug!(
                from_w = img.width(),
                from_h = img.height(),
                cap,
                "downscaling"
            );
            img = img.resize(cap, cap, FilterType::Lanczos3);
        }
    }

    match format {
        ImageOutputFormat::Jpeg => {
            // JPEG has no alpha; flatten before encoding.
            let rgb = img.to_rgb8();
            let file = std::fs::File::create(output)?;
            let mut w = BufWriter::new(file);
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut w, jpeg_quality);
            rgb.write_with_encoder(encoder)?;
        }
        ImageOutputFormat::Png => {
            img.save_with_format(output, image::ImageFormat::Png)?;
        }
        ImageOutputFormat::WebP => {
            img.save_with_format(output, image::ImageFormat::WebP)?;
        }
    }

    Ok((img.width(), img.height()))
}
