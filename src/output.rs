//! Data model shared by every pipeline stage: tasks, results, job state.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Identifier of a submitted job, unique within one [`crate::controller::PrintPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One page worth of conversion work. Immutable once created.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub document_id: JobId,
    pub document_path: Arc<Path>,
    /// 0-based.
    pub page_index: usize,
    pub total_pages: usize,
    pub dpi: u32,
}

/// Outcome of converting one page. Exactly one is produced per page per job.
#[derive(Debug, Clone)]
pub enum PageResult {
    Success {
        page_index: usize,
        image_bytes: Vec<u8>,
        size_bytes: usize,
        duration_ms: u64,
    },
    Failure {
        page_index: usize,
        cause: PageError,
        attempts: u32,
    },
}

impl PageResult {
    pub fn page_index(&self) -> usize {
        match self {
            PageResult::Success { page_index, .. } | PageResult::Failure { page_index, .. } => {
                *page_index
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PageResult::Success { .. })
    }
}

/// Lifecycle of a job.
///
/// ```text
/// Queued → Splitting → Converting → Draining → Completed
///    └──────────┴───────────┴───────────┴────→ Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Splitting,
    Converting,
    Draining,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `self → next` is a legal, forward-only transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (_, Failed | Cancelled) => !self.is_terminal(),
            (Queued, Splitting)
            | (Splitting, Converting)
            | (Converting, Draining)
            | (Draining, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Splitting => "splitting",
            JobState::Converting => "converting",
            JobState::Draining => "draining",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a running or finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Pages acknowledged by the device.
    pub emitted_count: usize,
    /// 0 until the page count is known.
    pub total_pages: usize,
    /// Permanently failed pages, ascending.
    pub failed_pages: Vec<usize>,
    /// Out-of-order pages currently held by the reorder buffer.
    pub buffered: usize,
    /// Largest `buffered` value observed so far.
    pub peak_buffered: usize,
}

/// Final report of a terminal job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub total_pages: usize,
    /// Pages acknowledged by the device.
    pub succeeded_count: usize,
    /// Permanently failed pages, ascending, 0-based.
    pub failed_page_indices: Vec<usize>,
    pub duration_ms: u64,
    pub final_state: JobState,
    /// One entry per failed page, with its cause.
    pub failures: Vec<PageError>,
    /// Fatal job error, when the job failed before or outside page handling.
    pub error: Option<String>,
}

impl PipelineResult {
    pub(crate) fn empty(final_state: JobState) -> Self {
        Self {
            total_pages: 0,
            succeeded_count: 0,
            failed_page_indices: Vec::new(),
            duration_ms: 0,
            final_state,
            failures: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_state == JobState::Completed && self.failed_page_indices.is_empty()
    }
}
