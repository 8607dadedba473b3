//! # fetchmill
//!
//! A bounded-concurrency job pipeline for fetching, classifying, and
//! converting documents and media.
//!
//! ## Why this crate?
//!
//! Services that accept "here is a URL, send me back a usable artifact"
//! requests — chat bots, web endpoints, batch importers — all reinvent the
//! same machinery: download with limits, figure out what the bytes
//! actually are, run the right converter, clean up scratch space whether
//! the job succeeded or exploded. This crate is that machinery, once:
//! jobs run on a fixed worker pool, scratch is partitioned per job and
//! reclaimed exactly once, and every terminal outcome — success, failure,
//! cancellation — reaches the caller's sink.
//!
//! ## Pipeline Overview
//!
//! ```text
//! JobDescriptor
//!  │
//!  ├─ 1. Fetch     segmented ranged download into per-job scratch
//!  ├─ 2. Classify  magic-number sniffing (never extensions)
//!  ├─ 3. Convert   PDF→PNG pages (pdfium) / image transcode / ffmpeg
//!  └─ 4. Deliver   artifacts or error to the DeliverySink, then reclaim
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fetchmill::{
//!     FileSink, JobDescriptor, PageSelection, Pipeline, PipelineConfig, SourceRef, TargetSpec,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().concurrency(2).build()?;
//!     let pipeline = Pipeline::new(config, Arc::new(FileSink::new("out")));
//!
//!     let mut handle = pipeline.submit(JobDescriptor::new(
//!         SourceRef::Url("https://example.com/report.pdf".into()),
//!         TargetSpec::PdfRaster { dpi: 150, pages: PageSelection::All },
//!     ))?;
//!
//!     let status = handle.wait().await;
//!     println!("{:?}", status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fetchmill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fetchmill = { version = "0.3", default-features = false }
//! ```
//!
//! ## External tools
//!
//! PDF rasterisation binds the pdfium shared library at runtime;
//! audio/video transcoding shells out to `ffmpeg` (and `ffprobe` for
//! duration metadata). Image transcoding and everything else is pure
//! Rust. Jobs that never touch those converters never need the tools.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod runner;
pub mod scratch;
pub mod target;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConfigError, PipelineConfig, PipelineConfigBuilder};
pub use error::{ClassifyError, ConvertError, DeliverError, FetchError, JobError};
pub use job::{JobDescriptor, JobId, JobLimits, JobStatus, Priority, SourceRef, Stage};
pub use observer::PipelineObserver;
pub use output::{ArtifactMetadata, ConversionResult, Delivery, JobOutcome};
pub use pipeline::classify::{ContentKind, MediaClass};
pub use pipeline::deliver::{DeliverySink, FileSink};
pub use runner::{JobHandle, Pipeline, ShutdownError};
pub use scratch::ScratchAsset;
pub use target::{ImageOutputFormat, MediaContainer, PageSelection, TargetSpec};
