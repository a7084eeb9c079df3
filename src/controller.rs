//! Pipeline controller: job lifecycle, supervision and the job registry.
//!
//! [`PrintPipeline::submit`] registers a job and spawns its driver, which
//! walks the job through
//!
//! ```text
//! Queued → Splitting → Converting → Draining → Completed
//!                 └───────────┴───────────┴────→ Failed | Cancelled
//! ```
//!
//! Per job the driver owns one task feeder, `W` workers and one consumer.
//! Cancellation flows down a token tree:
//!
//! ```text
//! pipeline root ── job token (cancel()) ── halt token (workers, feeder, consumer)
//! ```
//!
//! The halt token is a child of the job token, so cancelling the job stops
//! every stage, while an abort or a crashed stage can stop the stages
//! without the job counting as cancelled.

use crate::backend::Backends;
use crate::config::{PipelineConfig, MAX_DPI, MIN_DPI};
use crate::error::{DocumentError, PageError, PipelineError};
use crate::job::{JobHandle, JobShared};
use crate::output::{JobId, JobState, PipelineResult};
use crate::pipeline::consumer::{ConsumerOutcome, OutputConsumer};
use crate::pipeline::input::resolve_input;
use crate::pipeline::reorder::ReorderBuffer;
use crate::pipeline::source::TaskSource;
use crate::pipeline::workers::{spawn_pool, WorkerContext};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a job driver ended, before it is mapped onto a terminal state.
#[derive(Debug)]
enum JobOutcome {
    Completed,
    Aborted(PageError),
    Cancelled,
    Fatal(PipelineError),
}

/// Runs print jobs against one set of backends.
///
/// Jobs are independent: each gets its own workers, buffer and consumer.
/// Pages of one job reach the device in ascending order; jobs submitted to
/// the same pipeline may interleave on the device.
pub struct PrintPipeline {
    config: Arc<PipelineConfig>,
    backends: Backends,
    root: CancellationToken,
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, JobHandle>>,
}

impl std::fmt::Debug for PrintPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintPipeline")
            .field("config", &self.config)
            .field("jobs", &self.registry().len())
            .finish()
    }
}

impl PrintPipeline {
    /// Create a pipeline. No task runs until a job is submitted.
    pub fn start(config: PipelineConfig, backends: Backends) -> Self {
        info!(
            "Print pipeline started: {} workers, buffer {}, policy {:?}, device '{}'",
            config.worker_count, config.buffer_capacity, config.failure_policy, config.device_id
        );
        Self {
            config: Arc::new(config),
            backends,
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<JobId, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a document (local path or HTTP(S) URL) for printing.
    ///
    /// `dpi` is clamped to the supported range. Returns immediately; the job
    /// runs on the current Tokio runtime, which must exist.
    pub fn submit(&self, document: impl Into<String>, dpi: u32) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let document = document.into();
        let dpi = dpi.clamp(MIN_DPI, MAX_DPI);

        let shared = Arc::new(JobShared::new(
            id,
            document,
            dpi,
            self.root.child_token(),
        ));
        let handle = JobHandle::new(Arc::clone(&shared));
        self.registry().insert(id, handle.clone());

        info!("{}: submitted '{}' at {} dpi", id, shared.document(), dpi);
        tokio::spawn(run_job(
            shared,
            Arc::clone(&self.config),
            self.backends.clone(),
        ));
        handle
    }

    /// Look up a job that has not been reaped yet.
    pub fn job(&self, id: JobId) -> Option<JobHandle> {
        self.registry().get(&id).cloned()
    }

    /// All registered jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobHandle> {
        self.registry().values().cloned().collect()
    }

    /// Drop finished jobs whose result has been retrieved. Returns how many.
    pub fn reap(&self) -> usize {
        let mut jobs = self.registry();
        let before = jobs.len();
        jobs.retain(|_, handle| !handle.was_retrieved());
        let reaped = before - jobs.len();
        if reaped > 0 {
            debug!("Reaped {} finished jobs", reaped);
        }
        reaped
    }

    /// Cancel every job, running or not yet started.
    pub fn shutdown(&self) {
        info!("Print pipeline shutting down");
        self.root.cancel();
    }
}

/// Job driver. Always publishes a result, even if a stage panics.
async fn run_job(job: Arc<JobShared>, config: Arc<PipelineConfig>, backends: Backends) {
    let outcome = AssertUnwindSafe(execute(&job, &config, &backends))
        .catch_unwind()
        .await;

    let (state, error) = match outcome {
        Ok(JobOutcome::Completed) => (JobState::Completed, None),
        Ok(JobOutcome::Aborted(cause)) => (JobState::Failed, Some(format!("aborted: {cause}"))),
        Ok(JobOutcome::Cancelled) => (JobState::Cancelled, None),
        Ok(JobOutcome::Fatal(e)) => (JobState::Failed, Some(e.to_string())),
        Err(panic) => (
            JobState::Failed,
            Some(format!("job driver panicked: {}", panic_message(panic.as_ref()))),
        ),
    };

    let result = job.finish(state, error);
    report(&job, &result);
    if let Some(cb) = &config.progress_callback {
        cb.on_job_complete(&result);
    }
}

fn report(job: &JobShared, result: &PipelineResult) {
    match result.final_state {
        JobState::Completed => info!(
            "{}: completed, {}/{} pages printed, {} skipped, {}ms",
            job.id(),
            result.succeeded_count,
            result.total_pages,
            result.failed_page_indices.len(),
            result.duration_ms
        ),
        JobState::Cancelled => info!(
            "{}: cancelled after {}/{} pages",
            job.id(),
            result.succeeded_count,
            result.total_pages
        ),
        _ => error!(
            "{}: failed after {}/{} pages: {}",
            job.id(),
            result.succeeded_count,
            result.total_pages,
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn execute(
    job: &Arc<JobShared>,
    config: &Arc<PipelineConfig>,
    backends: &Backends,
) -> JobOutcome {
    let cancel = job.cancel_token().clone();
    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    job.transition(JobState::Splitting);

    // ── Split ────────────────────────────────────────────────────────────
    let split = async {
        let input = resolve_input(job.document(), config.download_timeout_secs).await?;
        let source =
            TaskSource::split(backends.counter.as_ref(), job.id(), input.path(), job.dpi()).await?;
        Ok::<_, DocumentError>((input, source))
    };
    // `_input` keeps a downloaded document alive until the job ends.
    let (_input, source) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return JobOutcome::Cancelled,
        split = split => match split {
            Ok(parts) => parts,
            Err(e) => return JobOutcome::Fatal(e.into()),
        },
    };

    let total = source.total_pages();
    job.set_total(total);
    info!(
        "{}: {} pages, {} workers, buffer capacity {}",
        job.id(),
        total,
        config.worker_count,
        config.buffer_capacity
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_job_start(total);
    }

    let buffer = match ReorderBuffer::new(total, config.buffer_capacity) {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => return JobOutcome::Fatal(e),
    };
    job.attach_buffer(Arc::clone(&buffer));
    job.transition(JobState::Converting);

    // ── Convert and print ────────────────────────────────────────────────
    let halt = cancel.child_token();
    let (queue, feeder) = source.spawn_feeder(config.queue_capacity(), halt.clone());

    let ctx = Arc::new(WorkerContext {
        job: job.id(),
        rasterizer: Arc::clone(&backends.rasterizer),
        buffer: Arc::clone(&buffer),
        config: Arc::clone(config),
        stop: halt.clone(),
    });
    let mut workers = spawn_pool(config.worker_count, queue, ctx);

    let consumer = OutputConsumer::new(
        Arc::clone(job),
        Arc::clone(&buffer),
        Arc::clone(&backends.submitter),
        Arc::clone(config),
        halt.clone(),
    );
    // Dropping the guard halts the workers whichever way the consumer ends.
    let halt_on_exit = halt.clone().drop_guard();
    let consumer = tokio::spawn(async move {
        let _halt_on_exit = halt_on_exit;
        consumer.run().await
    });

    let mut internal: Option<String> = None;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("{}: worker task failed: {}", job.id(), e);
            internal.get_or_insert_with(|| format!("worker task failed: {e}"));
            halt.cancel();
        }
    }
    if internal.is_none() && buffer.snapshot().accepted == total {
        job.transition(JobState::Draining);
    }

    let outcome = match consumer.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}: consumer task failed: {}", job.id(), e);
            internal.get_or_insert_with(|| format!("consumer task failed: {e}"));
            ConsumerOutcome::Halted
        }
    };

    match feeder.await {
        Ok(queued) => debug!("{}: feeder finished after {} tasks", job.id(), queued),
        Err(e) => warn!("{}: feeder task failed: {}", job.id(), e),
    }
    let released = buffer.close();
    if released > 0 {
        debug!("{}: released {} buffered pages", job.id(), released);
    }

    if let Some(detail) = internal {
        return JobOutcome::Fatal(PipelineError::Internal(detail));
    }
    match outcome {
        ConsumerOutcome::Finished => {
            job.transition(JobState::Draining);
            JobOutcome::Completed
        }
        ConsumerOutcome::Aborted(cause) => JobOutcome::Aborted(cause),
        ConsumerOutcome::Halted => JobOutcome::Cancelled,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
