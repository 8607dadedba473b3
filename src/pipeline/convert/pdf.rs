//! PDF rasterisation: render selected pages to PNG files via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto a thread
//! designed for blocking operations, so Tokio workers never stall during
//! CPU-heavy rendering.
//!
//! ## Why scale from DPI?
//!
//! The caller asks for a DPI; PDF pages are measured in points (1/72").
//! Each page's pixel width is `points / 72 * dpi`, so an A4 page at the
//! default 150 DPI lands around 1 240 px — sharp text, bounded memory.

use crate::error::ConvertError;
use crate::output::{ArtifactMetadata, ConversionResult};
use crate::pipeline::classify::ContentKind;
use crate::scratch::ScratchAsset;
use crate::target::PageSelection;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

use super::ConvertContext;

/// Rasterise the selected pages of `asset` at `dpi` into per-page PNGs.
pub async fn rasterize(
    asset: &ScratchAsset,
    dpi: u32,
    pages: &PageSelection,
    ctx: &ConvertContext<'_>,
) -> Result<ConversionResult, ConvertError> {
    let input = asset.path.clone();
    let out_dir = ctx.scratch.path().to_path_buf();
    let selection = pages.clone();

    let rendered = tokio::task::spawn_blocking(move || {
        rasterize_blocking(&input, dpi, &selection, &out_dir)
    })
    .await
    .map_err(|e| ConvertError::BadDocument {
        detail: format!("render task panicked: {e}"),
    })??;

    let mut outputs = Vec::with_capacity(rendered.len());
    for path in &rendered {
        let mut out = ScratchAsset::from_path(path.clone())?;
        out.kind = Some(ContentKind::Png);
        outputs.push(out);
    }

    info!(pages = outputs.len(), dpi, "pdf rasterised");
    let metadata = ArtifactMetadata {
        page_count: Some(outputs.len()),
        ..ArtifactMetadata::default()
    };
    Ok(ConversionResult { outputs, metadata })
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    input: &std::path::Path,
    dpi: u32,
    selection: &PageSelection,
    out_dir: &std::path::Path,
) -> Result<Vec<PathBuf>, ConvertError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(input, None)
        .map_err(|e| ConvertError::BadDocument {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let indices = selection.to_indices(total);
    if indices.is_empty() {
        return Err(ConvertError::PageOutOfRange { total });
    }

    let mut results = Vec::with_capacity(indices.len());
    for &idx in &indices {
        let page = pages.get(idx as u16).map_err(|e| ConvertError::BadDocument {
            detail: format!("page {}: {e:?}", idx + 1),
        })?;

        // Page width in points → pixel width at the requested DPI.
        let target_width = (page.width().value / 72.0 * dpi as f32).round() as i32;
        let render_config = PdfRenderConfig::new().set_target_width(target_width.max(1));

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| ConvertError::BadDocument {
                    detail: format!("page {}: {e:?}", idx + 1),
                })?;
        let image = bitmap.as_image();

        let path = out_dir.join(format!("page-{:04}.png", idx + 1));
        image.save_with_format(&path, ::image::ImageFormat::Png)?;
        debug!(
            page = idx + 1,
            width = image.width(),
            height = image.height(),
            "page rendered"
        );
        results.push(path);
    }

    Ok(results)
}
