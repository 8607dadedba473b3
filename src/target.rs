//! Target specifications: what the caller wants the asset converted into.
//!
//! A [`TargetSpec`] travels opaquely through the pipeline until the
//! Converting stage, where it is validated against the asset's sniffed
//! [`crate::pipeline::classify::ContentKind`] before any converter runs. Numeric
//! knobs (DPI, bitrate) are configuration-surface values, validated here
//! but not interpreted until the converter builds its render config or
//! ffmpeg command line.

use serde::{Deserialize, Serialize};

/// The requested output representation for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TargetSpec {
    /// Rasterise pages of a PDF into per-page PNG images.
    PdfRaster {
        /// Rendering DPI. Valid range 72–400; 150 keeps text sharp while
        /// bounding pixel buffers.
        dpi: u32,
        /// Which pages to render.
        pages: PageSelection,
    },
    /// Re-encode an image, optionally capping its longest edge.
    ImageTranscode {
        format: ImageOutputFormat,
        /// Downscale so neither dimension exceeds this, preserving aspect.
        /// `None` keeps the original size.
        max_dimension: Option<u32>,
    },
    /// Re-encode audio/video through ffmpeg.
    MediaTranscode {
        container: MediaContainer,
        /// Video bitrate in kbit/s; `None` lets ffmpeg choose.
        video_bitrate_kbps: Option<u32>,
        /// Audio bitrate in kbit/s; `None` lets ffmpeg choose.
        audio_bitrate_kbps: Option<u32>,
        /// Drop the video stream entirely (audio extraction).
        audio_only: bool,
    },
}

/// Specifies which pages of a document to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed
    /// page numbers, dropping anything past `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Output image container for [`TargetSpec::ImageTranscode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageOutputFormat {
    Png,
    Jpeg,
    WebP,
}

impl ImageOutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageOutputFormat::Png => "png",
            ImageOutputFormat::Jpeg => "jpg",
            ImageOutputFormat::WebP => "webp",
        }
    }
}

/// Output container for [`TargetSpec::MediaTranscode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaContainer {
    Mp4,
    Webm,
    Mkv,
    Mp3,
    Opus,
    Wav,
}

impl MediaContainer {
    pub fn extension(self) -> &'static str {
        match self {
            MediaContainer::Mp4 => "mp4",
            MediaContainer::Webm => "webm",
            MediaContainer::Mkv => "mkv",
            MediaContainer::Mp3 => "mp3",
            MediaContainer::Opus => "opus",
            MediaContainer::Wav => "wav",
        }
    }

    /// Whether the container can only carry audio.
    pub fn is_audio_only(self) -> bool {
        matches!(
            self,
            MediaContainer::Mp3 | MediaContainer::Opus | MediaContainer::Wav
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![1, 3, 5]).to_indices(5),
            vec![0, 2, 4]
        );
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2] // deduplicated and sorted
        );
    }

    #[test]
    fn audio_only_containers() {
        assert!(MediaContainer::Mp3.is_audio_only());
        assert!(MediaContainer::Opus.is_audio_only());
        assert!(!MediaContainer::Mp4.is_audio_only());
    }
}
