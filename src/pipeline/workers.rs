//! Conversion worker pool.
//!
//! `W` identical tasks pull [`PageTask`]s from the shared queue, rasterise
//! them and push the outcome into the reorder buffer. Because tasks are
//! popped in ascending order and a worker holds one page at a time, the page
//! at the buffer's cursor is always either in flight or already buffered,
//! so a worker waiting on a full buffer is always eventually released.
//!
//! ## Retry strategy
//!
//! Rasteriser errors are usually transient (a pdfium worker busy, a file
//! briefly locked). Each page gets `max_retries` retries with exponential
//! backoff (`retry_backoff_ms × 2^(attempt-1)`); with the defaults the waits
//! are 250 ms, 500 ms and 1 s. After that the page becomes a
//! [`PageResult::Failure`], which still goes through the buffer so the
//! consumer sees it in order.

use super::reorder::{AcceptError, ReorderBuffer};
use super::source::{next_task, TaskQueue};
use crate::backend::Rasterizer;
use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::output::{JobId, PageResult, PageTask};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a worker needs, shared by the whole pool.
pub(crate) struct WorkerContext {
    pub job: JobId,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub buffer: Arc<ReorderBuffer>,
    pub config: Arc<PipelineConfig>,
    /// Stops the pool: job cancellation, abort policy or a fatal error.
    pub stop: CancellationToken,
}

/// Rasterise one page, retrying with backoff.
///
/// Never returns an error: exhausted retries become a `Failure` result.
/// `attempts` counts every call made to the rasteriser. A render that has
/// started always runs to completion; `stop` is only observed while backing
/// off, in which case `None` is returned and no further attempt is made.
pub async fn convert_page(
    rasterizer: &dyn Rasterizer,
    task: &PageTask,
    config: &PipelineConfig,
    stop: &CancellationToken,
) -> Option<PageResult> {
    let start = Instant::now();
    let page = task.page_index;
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.conversion_backoff(attempt);
            warn!(
                "{}: page {}: retry {}/{} after {:?}",
                task.document_id,
                page + 1,
                attempt,
                config.max_retries,
                backoff
            );
            tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                _ = sleep(backoff) => {}
            }
        }

        match rasterizer
            .render(&task.document_path, page, task.dpi)
            .await
        {
            Ok(image_bytes) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(
                    "{}: page {} rendered ({} bytes, {}ms)",
                    task.document_id,
                    page + 1,
                    image_bytes.len(),
                    duration_ms
                );
                return Some(PageResult::Success {
                    page_index: page,
                    size_bytes: image_bytes.len(),
                    image_bytes,
                    duration_ms,
                });
            }
            Err(e) => {
                warn!(
                    "{}: page {}: attempt {} failed: {}",
                    task.document_id,
                    page + 1,
                    attempt + 1,
                    e.detail
                );
                last_err = Some(e.detail);
            }
        }
    }

    let attempts = config.max_retries + 1;
    Some(PageResult::Failure {
        page_index: page,
        cause: PageError::ConversionFailed {
            page,
            attempts,
            detail: last_err.unwrap_or_else(|| "unknown error".to_string()),
        },
        attempts,
    })
}

/// Start `worker_count` workers on `queue`. Each returns how many results it
/// delivered to the buffer.
pub(crate) fn spawn_pool(
    worker_count: usize,
    queue: TaskQueue,
    ctx: Arc<WorkerContext>,
) -> JoinSet<usize> {
    let mut pool = JoinSet::new();
    for worker in 0..worker_count.max(1) {
        pool.spawn(run_worker(worker, Arc::clone(&queue), Arc::clone(&ctx)));
    }
    pool
}

async fn run_worker(worker: usize, queue: TaskQueue, ctx: Arc<WorkerContext>) -> usize {
    let mut delivered = 0usize;

    loop {
        let task = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => break,
            task = next_task(&queue) => match task {
                Some(task) => task,
                None => break,
            },
        };

        let converted =
            convert_page(ctx.rasterizer.as_ref(), &task, &ctx.config, &ctx.stop).await;
        let result = match converted {
            Some(result) if !ctx.stop.is_cancelled() => result,
            _ => {
                debug!("{}: worker {} discarded page {}", ctx.job, worker, task.page_index + 1);
                break;
            }
        };

        if let (Some(cb), PageResult::Success { size_bytes, .. }) =
            (&ctx.config.progress_callback, &result)
        {
            cb.on_page_converted(task.page_index, task.total_pages, *size_bytes);
        }

        match ctx.buffer.accept(result, &ctx.stop).await {
            Ok(()) => delivered += 1,
            Err(AcceptError::Cancelled | AcceptError::Closed) => break,
            Err(e) => warn!("{}: worker {}: {}", ctx.job, worker, e),
        }
    }

    debug!("{}: worker {} exiting after {} pages", ctx.job, worker, delivered);
    delivered
}
