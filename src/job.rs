//! Per-job bookkeeping and the caller-facing [`JobHandle`].
//!
//! A job's mutable record (state, counters, failures) lives in one
//! [`JobShared`] behind a short-lived lock. The job driver writes it, the
//! consumer records printed and failed pages into it, and any number of
//! handles read it. Completion is published once through a `watch` channel,
//! which is what [`JobHandle::wait`] awaits.

use crate::error::PageError;
use crate::output::{JobId, JobState, JobStatus, PipelineResult};
use crate::pipeline::reorder::ReorderBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
struct Progress {
    state: JobState,
    total_pages: usize,
    emitted: usize,
    failures: Vec<PageError>,
}

/// State shared by the job driver, its consumer and every handle.
#[derive(Debug)]
pub(crate) struct JobShared {
    id: JobId,
    document: String,
    dpi: u32,
    started: Instant,
    cancel: CancellationToken,
    progress: Mutex<Progress>,
    buffer: OnceLock<Arc<ReorderBuffer>>,
    result_tx: watch::Sender<Option<PipelineResult>>,
    retrieved: AtomicBool,
}

impl JobShared {
    pub(crate) fn new(id: JobId, document: String, dpi: u32, cancel: CancellationToken) -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            id,
            document,
            dpi,
            started: Instant::now(),
            cancel,
            progress: Mutex::new(Progress {
                state: JobState::Queued,
                total_pages: 0,
                emitted: 0,
                failures: Vec::new(),
            }),
            buffer: OnceLock::new(),
            result_tx,
            retrieved: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn document(&self) -> &str {
        &self.document
    }

    pub(crate) fn dpi(&self) -> u32 {
        self.dpi
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn state(&self) -> JobState {
        self.lock().state
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub(crate) fn transition(&self, next: JobState) -> bool {
        let mut progress = self.lock();
        let current = progress.state;
        if !current.can_transition_to(next) {
            return false;
        }
        progress.state = next;
        drop(progress);
        debug!("{}: {} -> {}", self.id, current, next);
        true
    }

    pub(crate) fn set_total(&self, total_pages: usize) {
        self.lock().total_pages = total_pages;
    }

    pub(crate) fn attach_buffer(&self, buffer: Arc<ReorderBuffer>) {
        if self.buffer.set(buffer).is_err() {
            warn!("{}: reorder buffer attached twice", self.id);
        }
    }

    pub(crate) fn record_printed(&self) -> usize {
        let mut progress = self.lock();
        progress.emitted += 1;
        progress.emitted
    }

    /// Record a permanent page failure. A page is recorded at most once.
    pub(crate) fn record_failure(&self, cause: PageError) {
        let mut progress = self.lock();
        if progress.failures.iter().any(|f| f.page() == cause.page()) {
            return;
        }
        progress.failures.push(cause);
    }

    pub(crate) fn status(&self) -> JobStatus {
        let (pending, peak) = self
            .buffer
            .get()
            .map(|b| {
                let snap = b.snapshot();
                (snap.pending, snap.peak_pending)
            })
            .unwrap_or((0, 0));

        let progress = self.lock();
        JobStatus {
            state: progress.state,
            emitted_count: progress.emitted,
            total_pages: progress.total_pages,
            failed_pages: failed_indices(&progress.failures),
            buffered: pending,
            peak_buffered: peak,
        }
    }

    /// Enter a terminal state and publish the result.
    ///
    /// Only the first call takes effect; later calls return the published
    /// result unchanged.
    pub(crate) fn finish(&self, requested: JobState, error: Option<String>) -> PipelineResult {
        if let Some(done) = self.result_tx.borrow().clone() {
            return done;
        }

        let mut progress = self.lock();
        if progress.state.can_transition_to(requested) {
            progress.state = requested;
        } else if !progress.state.is_terminal() {
            warn!(
                "{}: cannot finish as {} from {}, marking failed",
                self.id, requested, progress.state
            );
            progress.state = JobState::Failed;
        }

        let mut failures = progress.failures.clone();
        failures.sort_by_key(PageError::page);
        let result = PipelineResult {
            total_pages: progress.total_pages,
            succeeded_count: progress.emitted,
            failed_page_indices: failed_indices(&failures),
            duration_ms: self.started.elapsed().as_millis() as u64,
            final_state: progress.state,
            failures,
            error,
        };
        drop(progress);

        self.result_tx.send_replace(Some(result.clone()));
        result
    }

    fn published(&self) -> Option<PipelineResult> {
        self.result_tx.borrow().clone()
    }
}

fn failed_indices(failures: &[PageError]) -> Vec<usize> {
    let mut pages: Vec<usize> = failures.iter().map(PageError::page).collect();
    pages.sort_unstable();
    pages
}

/// Caller-side handle to a submitted job. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(shared: Arc<JobShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> JobId {
        self.shared.id()
    }

    /// The document path or URL the job was submitted with.
    pub fn document(&self) -> &str {
        self.shared.document()
    }

    /// Snapshot of the job's progress.
    pub fn status(&self) -> JobStatus {
        self.shared.status()
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Request cancellation. Idempotent, returns immediately.
    ///
    /// Has no effect on a job that already reached a terminal state.
    pub fn cancel(&self) {
        self.shared.cancel_token().cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.shared.result_tx.borrow().is_some()
    }

    /// The final result if the job has finished, without waiting.
    pub fn try_result(&self) -> Option<PipelineResult> {
        let result = self.shared.published();
        if result.is_some() {
            self.shared.retrieved.store(true, Ordering::Release);
        }
        result
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(&self) -> PipelineResult {
        let mut rx = self.shared.result_tx.subscribe();
        let published = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|result| (*result).clone());
        self.shared.retrieved.store(true, Ordering::Release);

        published.unwrap_or_else(|| {
            let mut result = PipelineResult::empty(JobState::Failed);
            result.error = Some("job driver exited without a result".into());
            result
        })
    }

    /// [`cancel`](Self::cancel) then [`wait`](Self::wait).
    pub async fn cancel_and_wait(&self) -> PipelineResult {
        self.cancel();
        self.wait().await
    }

    pub(crate) fn was_retrieved(&self) -> bool {
        self.is_finished() && self.shared.retrieved.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shared() -> Arc<JobShared> {
        Arc::new(JobShared::new(
            JobId(1),
            "doc.pdf".into(),
            300,
            CancellationToken::new(),
        ))
    }

    fn conversion_failure(page: usize) -> PageError {
        PageError::ConversionFailed {
            page,
            attempts: 1,
            detail: "x".into(),
        }
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let job = shared();
        assert!(!job.transition(JobState::Converting));
        assert!(job.transition(JobState::Splitting));
        assert!(!job.transition(JobState::Queued));
        assert_eq!(job.state(), JobState::Splitting);
    }

    #[test]
    fn failures_are_sorted_and_deduplicated() {
        let job = shared();
        job.record_failure(conversion_failure(7));
        job.record_failure(conversion_failure(2));
        job.record_failure(conversion_failure(7));
        assert_eq!(job.status().failed_pages, vec![2, 7]);
    }

    #[test]
    fn finish_is_published_once() {
        let job = shared();
        job.transition(JobState::Splitting);
        job.set_total(3);
        job.record_printed();

        let first = job.finish(JobState::Cancelled, None);
        assert_eq!(first.final_state, JobState::Cancelled);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.succeeded_count, 1);

        let second = job.finish(JobState::Failed, Some("late".into()));
        assert_eq!(second, first);
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn completing_out_of_sequence_marks_failed() {
        let job = shared();
        job.transition(JobState::Splitting);
        let result = job.finish(JobState::Completed, None);
        assert_eq!(result.final_state, JobState::Failed);
    }

    #[tokio::test]
    async fn wait_returns_published_result() {
        let job = shared();
        let handle = JobHandle::new(Arc::clone(&job));
        assert!(!handle.is_finished());
        assert!(handle.try_result().is_none());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.was_retrieved());

        job.finish(JobState::Cancelled, None);
        let result = waiter.await.unwrap();
        assert_eq!(result.final_state, JobState::Cancelled);
        assert!(handle.is_finished());
        assert!(handle.was_retrieved());
    }

    #[test]
    fn cancel_trips_the_token() {
        let job = shared();
        let handle = JobHandle::new(Arc::clone(&job));
        handle.cancel();
        handle.cancel();
        assert!(job.cancel_token().is_cancelled());
    }
}
