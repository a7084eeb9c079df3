//! Output consumer: the single, serialized sink in front of the device.
//!
//! The consumer drains contiguous runs from the reorder buffer and handles
//! them one page at a time. A `Success` is submitted and its acknowledgment
//! awaited before the next page is looked at; a `Failure` goes straight to
//! the failure policy. Page `N + 1` is therefore never submitted before the
//! outcome of page `N` is settled.
//!
//! Submission errors (rejection or a missed acknowledgment deadline) are
//! retried `submit_retries` times with exponential backoff, then treated
//! exactly like a conversion failure.
//!
//! Halting is observed while waiting for the next page, during backoff and
//! between pages. A submission already handed to the device runs until it
//! is acknowledged or its deadline passes.

use super::reorder::ReorderBuffer;
use crate::backend::{Ack, PrintSubmitter};
use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::{PageError, SubmissionError};
use crate::job::JobShared;
use crate::output::PageResult;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the consumer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsumerOutcome {
    /// Every page was printed or skipped.
    Finished,
    /// A permanent failure under [`FailurePolicy::AbortOnFailure`].
    Aborted(PageError),
    /// The halt token fired before all pages were settled.
    Halted,
}

enum SubmitFailure {
    Halted,
    Exhausted(PageError),
}

pub(crate) struct OutputConsumer {
    job: Arc<JobShared>,
    buffer: Arc<ReorderBuffer>,
    submitter: Arc<dyn PrintSubmitter>,
    config: Arc<PipelineConfig>,
    halt: CancellationToken,
}

impl OutputConsumer {
    pub(crate) fn new(
        job: Arc<JobShared>,
        buffer: Arc<ReorderBuffer>,
        submitter: Arc<dyn PrintSubmitter>,
        config: Arc<PipelineConfig>,
        halt: CancellationToken,
    ) -> Self {
        Self {
            job,
            buffer,
            submitter,
            config,
            halt,
        }
    }

    pub(crate) async fn run(self) -> ConsumerOutcome {
        let total = self.buffer.total_pages();
        let mut settled = 0usize;

        while settled < total {
            let run = self.buffer.drain();
            if run.is_empty() {
                if !self.buffer.wait_ready(&self.halt).await {
                    return ConsumerOutcome::Halted;
                }
                continue;
            }

            for result in run {
                if self.halt.is_cancelled() {
                    return ConsumerOutcome::Halted;
                }
                settled += 1;

                let failure = match result {
                    PageResult::Success {
                        page_index,
                        image_bytes,
                        ..
                    } => match self.submit_page(page_index, &image_bytes).await {
                        Ok(ack) => {
                            let emitted = self.job.record_printed();
                            debug!(
                                "{}: page {} printed on '{}' ({}/{})",
                                self.job.id(),
                                page_index + 1,
                                ack.device_id,
                                emitted,
                                total
                            );
                            if let Some(cb) = &self.config.progress_callback {
                                cb.on_page_printed(page_index, total);
                            }
                            continue;
                        }
                        Err(SubmitFailure::Halted) => return ConsumerOutcome::Halted,
                        Err(SubmitFailure::Exhausted(cause)) => cause,
                    },
                    PageResult::Failure { cause, .. } => cause,
                };

                if let Some(outcome) = self.page_failed(failure, total) {
                    return outcome;
                }
            }
        }

        ConsumerOutcome::Finished
    }

    /// Record a permanent failure and apply the policy. `Some` stops the consumer.
    fn page_failed(&self, cause: PageError, total: usize) -> Option<ConsumerOutcome> {
        let page = cause.page();
        warn!("{}: {}", self.job.id(), cause);
        self.job.record_failure(cause.clone());
        if let Some(cb) = &self.config.progress_callback {
            cb.on_page_failed(page, total, &cause.to_string());
        }

        match self.config.failure_policy {
            FailurePolicy::AbortOnFailure => {
                info!(
                    "{}: aborting on page {} failure, nothing further is submitted",
                    self.job.id(),
                    page + 1
                );
                self.halt.cancel();
                Some(ConsumerOutcome::Aborted(cause))
            }
            FailurePolicy::SkipAndContinue => {
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_page_skipped(page, total);
                }
                None
            }
        }
    }

    async fn submit_page(&self, page: usize, image: &[u8]) -> Result<Ack, SubmitFailure> {
        let device = self.config.device_id.as_str();
        let retries = self.config.submit_retries;
        let mut last_err: Option<SubmissionError> = None;

        for attempt in 0..=retries {
            if self.halt.is_cancelled() {
                return Err(SubmitFailure::Halted);
            }
            if attempt > 0 {
                let backoff = self.config.submit_backoff(attempt);
                warn!(
                    "{}: page {}: submit retry {}/{} after {:?}",
                    self.job.id(),
                    page + 1,
                    attempt,
                    retries,
                    backoff
                );
                tokio::select! {
                    biased;
                    _ = self.halt.cancelled() => return Err(SubmitFailure::Halted),
                    _ = sleep(backoff) => {}
                }
            }

            // A submission in progress is never cut short by the halt token;
            // only the acknowledgment deadline bounds it.
            let outcome = timeout(
                self.config.submit_timeout(),
                self.submitter.submit(image, device, page),
            )
            .await;

            let err = match outcome {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(e)) => e,
                Err(_elapsed) => SubmissionError::Timeout {
                    device: device.to_string(),
                    page,
                    secs: self.config.submit_timeout_secs,
                },
            };
            warn!(
                "{}: page {}: submit attempt {} failed: {}",
                self.job.id(),
                page + 1,
                attempt + 1,
                err
            );
            last_err = Some(err);
        }

        if self.halt.is_cancelled() {
            return Err(SubmitFailure::Halted);
        }
        Err(SubmitFailure::Exhausted(PageError::SubmissionFailed {
            page,
            attempts: retries + 1,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{JobId, JobState};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records submitted pages; rejects pages listed in `reject`.
    #[derive(Default)]
    struct Recorder {
        printed: Mutex<Vec<usize>>,
        reject: Vec<usize>,
        stall: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl PrintSubmitter for Recorder {
        async fn submit(
            &self,
            _image: &[u8],
            device_id: &str,
            page_index: usize,
        ) -> Result<Ack, SubmissionError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject.contains(&page_index) {
                return Err(SubmissionError::Rejected {
                    device: device_id.to_string(),
                    page: page_index,
                    detail: "paper jam".into(),
                });
            }
            self.printed.lock().unwrap().push(page_index);
            Ok(Ack {
                device_id: device_id.to_string(),
                page_index,
                reference: None,
            })
        }
    }

    fn ok(page: usize) -> PageResult {
        PageResult::Success {
            page_index: page,
            image_bytes: vec![1],
            size_bytes: 1,
            duration_ms: 0,
        }
    }

    fn consumer(
        pages: usize,
        recorder: Arc<Recorder>,
        config: PipelineConfig,
    ) -> (OutputConsumer, Arc<ReorderBuffer>, Arc<JobShared>) {
        let job = Arc::new(JobShared::new(
            JobId(9),
            "doc.pdf".into(),
            300,
            CancellationToken::new(),
        ));
        job.set_total(pages);
        let buffer = Arc::new(ReorderBuffer::new(pages, pages + 1).unwrap());
        let halt = job.cancel_token().child_token();
        let c = OutputConsumer::new(
            Arc::clone(&job),
            Arc::clone(&buffer),
            recorder,
            Arc::new(config),
            halt,
        );
        (c, buffer, job)
    }

    fn fast_config(policy: FailurePolicy) -> PipelineConfig {
        PipelineConfig::builder()
            .failure_policy(policy)
            .submit_retries(1)
            .submit_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn submits_in_page_order() {
        let recorder = Arc::new(Recorder::default());
        let (c, buffer, job) = consumer(4, Arc::clone(&recorder), fast_config(FailurePolicy::SkipAndContinue));
        for page in [3, 1, 2, 0] {
            assert!(buffer.try_accept(ok(page)).unwrap().is_none());
        }

        assert_eq!(c.run().await, ConsumerOutcome::Finished);
        assert_eq!(*recorder.printed.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(job.status().emitted_count, 4);
    }

    #[tokio::test]
    async fn rejected_page_is_skipped_after_retries() {
        let recorder = Arc::new(Recorder {
            reject: vec![1],
            ..Default::default()
        });
        let (c, buffer, job) = consumer(3, Arc::clone(&recorder), fast_config(FailurePolicy::SkipAndContinue));
        for page in 0..3 {
            assert!(buffer.try_accept(ok(page)).unwrap().is_none());
        }

        assert_eq!(c.run().await, ConsumerOutcome::Finished);
        assert_eq!(*recorder.printed.lock().unwrap(), vec![0, 2]);
        assert_eq!(job.status().failed_pages, vec![1]);
    }

    #[tokio::test]
    async fn rejected_page_aborts_under_abort_policy() {
        let recorder = Arc::new(Recorder {
            reject: vec![1],
            ..Default::default()
        });
        let (c, buffer, job) = consumer(3, Arc::clone(&recorder), fast_config(FailurePolicy::AbortOnFailure));
        for page in 0..3 {
            assert!(buffer.try_accept(ok(page)).unwrap().is_none());
        }

        match c.run().await {
            ConsumerOutcome::Aborted(PageError::SubmissionFailed { page, attempts, .. }) => {
                assert_eq!(page, 1);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(*recorder.printed.lock().unwrap(), vec![0]);
        assert_eq!(job.state(), JobState::Queued);
    }

    #[tokio::test]
    async fn missing_ack_times_out() {
        let recorder = Arc::new(Recorder {
            stall: true,
            ..Default::default()
        });
        let config = PipelineConfig::builder()
            .submit_retries(0)
            .submit_timeout_secs(1)
            .build()
            .unwrap();
        let (c, buffer, job) = consumer(1, recorder, config);
        assert!(buffer.try_accept(ok(0)).unwrap().is_none());

        assert_eq!(c.run().await, ConsumerOutcome::Finished);
        let status = job.status();
        assert_eq!(status.emitted_count, 0);
        assert_eq!(status.failed_pages, vec![0]);
    }

    #[tokio::test]
    async fn cancel_stops_waiting_for_next_page() {
        let recorder = Arc::new(Recorder::default());
        let (c, buffer, job) = consumer(3, recorder, fast_config(FailurePolicy::SkipAndContinue));
        assert!(buffer.try_accept(ok(1)).unwrap().is_none());

        let run = tokio::spawn(c.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        job.cancel_token().cancel();

        assert_eq!(run.await.unwrap(), ConsumerOutcome::Halted);
    }

    #[tokio::test]
    async fn cancel_lets_the_current_submission_finish() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let (c, buffer, job) = consumer(2, Arc::clone(&recorder), fast_config(FailurePolicy::SkipAndContinue));
        for page in 0..2 {
            assert!(buffer.try_accept(ok(page)).unwrap().is_none());
        }

        let run = tokio::spawn(c.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        job.cancel_token().cancel();

        assert_eq!(run.await.unwrap(), ConsumerOutcome::Halted);
        assert_eq!(*recorder.printed.lock().unwrap(), vec![0]);
        assert_eq!(job.status().emitted_count, 1);
    }
}
