//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PrintProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! job as its pages are converted and printed. The CLI uses this to drive a
//! terminal progress bar; the chat layer can forward the same events to the
//! customer ("page 3/10 printed").
//!
//! Conversion events fire from worker tasks and may arrive out of order and
//! concurrently. Print events fire from the single consumer and always
//! arrive in ascending page order.
//!
//! # Example
//!
//! ```rust
//! use pagepress::{PipelineConfig, PrintProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     printed: AtomicUsize,
//! }
//!
//! impl PrintProgressCallback for CountingCallback {
//!     fn on_page_printed(&self, page_index: usize, total_pages: usize) {
//!         let done = self.printed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Printed page {} ({}/{})", page_index + 1, done, total_pages);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { printed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PrintProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PipelineResult;
use std::sync::Arc;

/// Called by the pipeline as a job advances.
///
/// All methods default to no-ops. Page indices are 0-based.
pub trait PrintProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is converted.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// A page was rasterised (worker side, any order).
    fn on_page_converted(&self, page_index: usize, total_pages: usize, size_bytes: usize) {
        let _ = (page_index, total_pages, size_bytes);
    }

    /// A page failed permanently, during conversion or submission.
    fn on_page_failed(&self, page_index: usize, total_pages: usize, error: &str) {
        let _ = (page_index, total_pages, error);
    }

    /// The device acknowledged a page (consumer side, ascending order).
    fn on_page_printed(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// A failed page was left out under `SkipAndContinue`.
    fn on_page_skipped(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// Called once when the job reaches a terminal state.
    fn on_job_complete(&self, result: &PipelineResult) {
        let _ = result;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PrintProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PrintProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::JobState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        converted: AtomicUsize,
        printed: AtomicUsize,
        skipped: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl PrintProgressCallback for TrackingCallback {
        fn on_page_converted(&self, _page: usize, _total: usize, _size: usize) {
            self.converted.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_failed(&self, _page: usize, _total: usize, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_printed(&self, _page: usize, _total: usize) {
            self.printed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_skipped(&self, _page: usize, _total: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
        fn on_job_complete(&self, _result: &PipelineResult) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start(5);
        cb.on_page_converted(0, 5, 1024);
        cb.on_page_failed(1, 5, "boom");
        cb.on_page_printed(0, 5);
        cb.on_page_skipped(1, 5);
        cb.on_job_complete(&PipelineResult::empty(JobState::Completed));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_page_converted(0, 2, 10);
        cb.on_page_converted(1, 2, 10);
        cb.on_page_printed(0, 2);
        cb.on_page_failed(1, 2, "jam");
        cb.on_page_skipped(1, 2);
        cb.on_job_complete(&PipelineResult::empty(JobState::Completed));

        assert_eq!(tracker.converted.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.printed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.finished.load(Ordering::SeqCst), 1);
    }
}
