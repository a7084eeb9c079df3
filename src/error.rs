//! Error types for the pagepress library.
//!
//! Errors fall into three groups that travel different distances:
//!
//! * [`PipelineError`] — **Fatal**: the job cannot run at all (unreadable
//!   document, buffer capacity unavailable, bad configuration). Reported as
//!   [`crate::output::PipelineResult::error`] with a `Failed` final state.
//!
//! * [`ConversionError`] / [`SubmissionError`] — **Transient**: a single
//!   rasterisation or print attempt failed. These are retried inside the
//!   worker or consumer and never escape it.
//!
//! * [`PageError`] — **Permanent per-page**: retries were exhausted for one
//!   page. Recorded in the job result and handled according to the active
//!   [`crate::config::FailurePolicy`].

use std::path::PathBuf;
use thiserror::Error;

/// Fatal job-level errors.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The document could not be opened or its page count determined.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The reorder buffer could not reserve room for `requested` pages.
    #[error("Cannot allocate reorder buffer for {requested} pages: {detail}")]
    Capacity { requested: usize, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (panicked task, closed channel).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The document is missing, unreadable or not a printable PDF.
///
/// Always fatal: a job whose document fails here never starts converting.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("Document not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("PDF '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// Page counter could not produce a count for another reason
    /// (missing pdfium library, prober crashed, zero pages).
    #[error("Cannot read page count of '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },
}

/// A single rasterisation attempt failed.
#[derive(Debug, Clone, Error)]
#[error("Page {page}: rasterisation failed: {detail}")]
pub struct ConversionError {
    /// 0-based page index.
    pub page: usize,
    pub detail: String,
}

impl ConversionError {
    pub fn new(page: usize, detail: impl Into<String>) -> Self {
        Self {
            page,
            detail: detail.into(),
        }
    }
}

/// A single print submission attempt failed.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    /// The device or spooler refused the page.
    #[error("Device '{device}' rejected page {page}: {detail}")]
    Rejected {
        device: String,
        page: usize,
        detail: String,
    },

    /// No acknowledgment arrived within the submit timeout.
    #[error("Device '{device}' did not acknowledge page {page} within {secs}s")]
    Timeout {
        device: String,
        page: usize,
        secs: u64,
    },
}

/// A permanent failure for one page after all retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    #[error("Page {page}: conversion failed after {attempts} attempts: {detail}")]
    ConversionFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    #[error("Page {page}: submission failed after {attempts} attempts: {detail}")]
    SubmissionFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },
}

impl PageError {
    /// 0-based index of the affected page.
    pub fn page(&self) -> usize {
        match self {
            PageError::ConversionFailed { page, .. } | PageError::SubmissionFailed { page, .. } => {
                *page
            }
        }
    }
}
