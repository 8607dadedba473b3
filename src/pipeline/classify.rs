//! Content classification by magic-number sniffing.
//!
//! ## Why bytes, not extensions?
//!
//! File extensions and caller-supplied MIME hints are untrusted input: a
//! renamed executable with a `.pdf` suffix must not reach the PDF
//! converter. The classifier reads a bounded prefix of the asset and
//! matches it against a table of byte signatures; the same prefix always
//! yields the same kind, and anything unrecognised is a typed error
//! rather than a guess.

use crate::error::ClassifyError;
use crate::scratch::ScratchAsset;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// How many leading bytes the classifier inspects.
///
/// 64 covers every signature in the table with room to spare; the longest
/// match point is the WAVE/WEBP discriminator at offset 8.
pub const SNIFF_LEN: usize = 64;

/// Classification tag derived from byte inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Pdf,
    Png,
    Jpeg,
    Gif,
    WebP,
    Mp3,
    Wav,
    Ogg,
    Flac,
    /// ISO base media: MP4, M4A, MOV and friends.
    Mp4,
    /// EBML container: MKV and WebM.
    Matroska,
}

/// Coarse routing class for converter dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaClass {
    Document,
    Image,
    Audio,
    Video,
}

impl ContentKind {
    /// Which converter family handles this kind.
    ///
    /// ISO-BMFF and Matroska files may be audio-only in practice; they are
    /// routed as Video because ffmpeg handles both and the media converter
    /// does not care which streams are present.
    pub fn class(self) -> MediaClass {
        match self {
            ContentKind::Pdf => MediaClass::Document,
            ContentKind::Png | ContentKind::Jpeg | ContentKind::Gif | ContentKind::WebP => {
                MediaClass::Image
            }
            ContentKind::Mp3 | ContentKind::Wav | ContentKind::Ogg | ContentKind::Flac => {
                MediaClass::Audio
            }
            ContentKind::Mp4 | ContentKind::Matroska => MediaClass::Video,
        }
    }
}

/// One row of the signature table: `magic` must appear at `offset`.
struct Signature {
    kind: ContentKind,
    offset: usize,
    magic: &'static [u8],
}

/// The signature table, most-specific first.
///
/// RIFF subformats (WAV, WebP) carry their discriminator at offset 8, and
/// ISO-BMFF puts `ftyp` at offset 4, so ordering and offsets both matter.
/// The bare MP3 frame-sync rows sit last: they are only two bytes and
/// would shadow longer matches.
static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        Signature { kind: ContentKind::Pdf, offset: 0, magic: b"%PDF" },
        Signature { kind: ContentKind::Png, offset: 0, magic: &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a] },
        Signature { kind: ContentKind::Jpeg, offset: 0, magic: &[0xff, 0xd8, 0xff] },
        Signature { kind: ContentKind::Gif, offset: 0, magic: b"GIF87a" },
        Signature { kind: ContentKind::Gif, offset: 0, magic: b"GIF89a" },
        Signature { kind: ContentKind::WebP, offset: 8, magic: b"WEBP" },
        Signature { kind: ContentKind::Wav, offset: 8, magic: b"WAVE" },
        Signature { kind: ContentKind::Ogg, offset: 0, magic: b"OggS" },
        Signature { kind: ContentKind::Flac, offset: 0, magic: b"fLaC" },
        Signature { kind: ContentKind::Mp4, offset: 4, magic: b"ftyp" },
        Signature { kind: ContentKind::Matroska, offset: 0, magic: &[0x1a, 0x45, 0xdf, 0xa3] },
        Signature { kind: ContentKind::Mp3, offset: 0, magic: b"ID3" },
        Signature { kind: ContentKind::Mp3, offset: 0, magic: &[0xff, 0xfb] },
        Signature { kind: ContentKind::Mp3, offset: 0, magic: &[0xff, 0xf3] },
        Signature { kind: ContentKind::Mp3, offset: 0, magic: &[0xff, 0xf2] },
    ]
});

/// Match a byte prefix against the signature table.
///
/// Pure and deterministic: no I/O, no state. The RIFF discriminators only
/// count when the outer `RIFF` fourcc is present as well.
pub fn classify_prefix(prefix: &[u8]) -> Result<ContentKind, ClassifyError> {
    for sig in SIGNATURES.iter() {
        let end = sig.offset + sig.magic.len();
        if prefix.len() < end {
            continue;
        }
        if &prefix[sig.offset..end] != sig.magic {
            continue;
        }
        // RIFF subformats share their discriminator offset with other
        // containers; require the outer fourcc too.
        if sig.offset == 8 && !prefix.starts_with(b"RIFF") {
            continue;
        }
        return Ok(sig.kind);
    }

    if prefix.len() < 4 {
        return Err(ClassifyError::TooShort {
            len: prefix.len() as u64,
        });
    }
    Err(ClassifyError::UnknownKind {
        prefix: prefix[..prefix.len().min(8)].to_vec(),
    })
}

/// Read a bounded prefix of `path` and classify it.
pub async fn sniff_file(path: &Path) -> Result<ContentKind, ClassifyError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; SNIFF_LEN];
    let mut filled = 0;
    // Loop: a single read may return short even when more bytes exist.
    while filled < SNIFF_LEN {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let kind = classify_prefix(&buf[..filled])?;
    debug!(path = %path.display(), ?kind, "classified");
    Ok(kind)
}

/// Classify a fetched asset, returning a copy with `kind` filled in.
pub async fn classify(asset: &ScratchAsset) -> Result<ScratchAsset, ClassifyError> {
    let kind = sniff_file(&asset.path).await?;
    Ok(ScratchAsset {
        path: asset.path.clone(),
        len: asset.len,
        kind: Some(kind),
    })
}
