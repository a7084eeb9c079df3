//! # pagepress
//!
//! Print multi-page PDF documents page by page, in order, with bounded memory.
//!
//! ## Why this crate?
//!
//! Documents sent to a print bot are often long, and rasterising a page at
//! print resolution is slow. Converting every page before printing wastes
//! minutes and gigabytes; converting them concurrently and printing as they
//! finish scrambles the page order. This crate converts pages on a fixed
//! worker pool and restores page order in a small bounded buffer, so the
//! device starts printing page 1 as soon as it is ready and never sees
//! page `N + 1` before page `N`.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF path / URL
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Source   count pages, feed page tasks into a bounded queue
//!  ├─ 3. Workers  W concurrent rasterisations (pdfium, spawn_blocking)
//!  ├─ 4. Reorder  bounded buffer, releases pages in ascending order
//!  └─ 5. Consumer one page at a time to the device, await acknowledgment
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagepress::{Backends, LpSubmitter, PdfiumBackend, PipelineConfig, PrintPipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .worker_count(4)
//!         .device_id("office-laser")
//!         .build()?;
//!     let backends = Backends::pdfium(
//!         PdfiumBackend::new(config.max_rendered_pixels),
//!         Arc::new(LpSubmitter::new()),
//!     );
//!
//!     let pipeline = PrintPipeline::start(config, backends);
//!     let job = pipeline.submit("contract.pdf", 300);
//!     let result = job.wait().await;
//!     eprintln!(
//!         "{}: {}/{} pages printed",
//!         result.final_state, result.succeeded_count, result.total_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagepress` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagepress = { version = "0.1", default-features = false }
//! ```
//!
//! ## Sizing
//!
//! | Knob | Default | Effect |
//! |------|---------|--------|
//! | `worker_count` | available parallelism | pages rasterised at once |
//! | `buffer_capacity` | `2 × worker_count` | pages held out of order |
//! | `queue_multiplier` | 2 | queued tasks per worker |
//!
//! Peak image memory is roughly `(worker_count + buffer_capacity) × page size`;
//! a 300-DPI A4 page is about 1 MB as PNG.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::lp::LpSubmitter;
pub use backend::pdfium::PdfiumBackend;
pub use backend::spool::SpoolDirSubmitter;
pub use backend::{Ack, Backends, PageCounter, PrintSubmitter, Rasterizer};
pub use config::{FailurePolicy, PipelineConfig, PipelineConfigBuilder, MAX_DPI, MIN_DPI};
pub use controller::PrintPipeline;
pub use error::{ConversionError, DocumentError, PageError, PipelineError, SubmissionError};
pub use job::JobHandle;
pub use output::{JobId, JobState, JobStatus, PageResult, PageTask, PipelineResult};
pub use pipeline::reorder::{AcceptError, BufferSnapshot, ReorderBuffer};
pub use progress::{NoopProgressCallback, PrintProgressCallback, ProgressCallback};
