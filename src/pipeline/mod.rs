//! Pipeline stages for the fetch-classify-convert-deliver job flow.
//!
//! Each submodule implements exactly one stage. Keeping stages separate
//! makes each independently testable and lets us swap implementations
//! (e.g. a different download strategy) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ classify ──▶ convert ──▶ deliver
//! (reqwest)  (magic)     (pdfium /    (sink)
//!                         image /
//!                         ffmpeg)
//! ```
//!
//! 1. [`fetch`]    — materialise the source into per-job scratch, with
//!    segmented ranged download for large bodies
//! 2. [`classify`] — sniff the content kind from a bounded byte prefix
//! 3. [`convert`]  — produce the target representation; pdfium and image
//!    work run in `spawn_blocking`, ffmpeg as a child process
//! 4. [`deliver`]  — hand artifacts (or the error) to the external sink
//!
//! Orchestration — the worker pool, the per-job state machine, admission
//! and cancellation — lives in [`crate::runner`], which composes these
//! stages in order.

pub mod classify;
pub mod convert;
pub mod deliver;
pub mod fetch;
