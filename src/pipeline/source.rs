//! Task source: split a document into page tasks and feed the bounded queue.
//!
//! Tasks are generated lazily from the page range and pushed into an
//! `mpsc` channel of `worker_count × queue_multiplier` slots, so a
//! thousand-page document never has more than a handful of `PageTask`s
//! alive at once.

use crate::backend::PageCounter;
use crate::error::DocumentError;
use crate::output::{JobId, PageTask};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receiving end of the task queue, shared by every worker.
pub type TaskQueue = Arc<Mutex<mpsc::Receiver<PageTask>>>;

/// The ordered page tasks of one document.
#[derive(Debug, Clone)]
pub struct TaskSource {
    job: JobId,
    document: Arc<Path>,
    total_pages: usize,
    dpi: u32,
}

impl TaskSource {
    /// Ask `counter` for the authoritative page count of `document`.
    pub async fn split(
        counter: &dyn PageCounter,
        job: JobId,
        document: &Path,
        dpi: u32,
    ) -> Result<Self, DocumentError> {
        let total_pages = counter.count(document).await?;
        if total_pages == 0 {
            return Err(DocumentError::Unreadable {
                path: document.to_path_buf(),
                detail: "document has no pages".into(),
            });
        }
        Ok(Self {
            job,
            document: Arc::from(document),
            total_pages,
            dpi,
        })
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Page tasks `0..total_pages`, in order, created on demand.
    pub fn tasks(&self) -> impl Iterator<Item = PageTask> + Send + 'static {
        let job = self.job;
        let document = Arc::clone(&self.document);
        let total_pages = self.total_pages;
        let dpi = self.dpi;
        (0..total_pages).map(move |page_index| PageTask {
            document_id: job,
            document_path: Arc::clone(&document),
            page_index,
            total_pages,
            dpi,
        })
    }

    /// Spawn the feeder that pushes every task into a queue of `capacity`
    /// slots. The feeder stops early when `cancel` fires or every receiver
    /// is gone.
    pub fn spawn_feeder(
        &self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (TaskQueue, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tasks = self.tasks();
        let job = self.job;

        let feeder = tokio::spawn(async move {
            let mut queued = 0usize;
            for task in tasks {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                        queued += 1;
                    }
                }
            }
            debug!("{}: queued {} page tasks", job, queued);
            queued
        });

        (Arc::new(Mutex::new(rx)), feeder)
    }
}

/// Pop the next task, or `None` once the queue is drained and closed.
pub async fn next_task(queue: &TaskQueue) -> Option<PageTask> {
    queue.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedCount(usize);

    #[async_trait]
    impl PageCounter for FixedCount {
        async fn count(&self, _document: &Path) -> Result<usize, DocumentError> {
            Ok(self.0)
        }
    }

    struct Unreadable;

    #[async_trait]
    impl PageCounter for Unreadable {
        async fn count(&self, document: &Path) -> Result<usize, DocumentError> {
            Err(DocumentError::Corrupt {
                path: document.to_path_buf(),
                detail: "bad xref".into(),
            })
        }
    }

    #[tokio::test]
    async fn tasks_cover_every_page_in_order() {
        let source = TaskSource::split(&FixedCount(5), JobId(1), Path::new("a.pdf"), 150)
            .await
            .unwrap();
        let indices: Vec<usize> = source.tasks().map(|t| t.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(source.tasks().all(|t| t.total_pages == 5 && t.dpi == 150));
    }

    #[tokio::test]
    async fn counter_errors_propagate() {
        let err = TaskSource::split(&Unreadable, JobId(1), Path::new("a.pdf"), 150)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn zero_pages_is_a_document_error() {
        let err = TaskSource::split(&FixedCount(0), JobId(1), Path::new("a.pdf"), 150)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn feeder_respects_capacity_and_order() {
        let source = TaskSource::split(&FixedCount(6), JobId(2), Path::new("a.pdf"), 150)
            .await
            .unwrap();
        let (queue, feeder) = source.spawn_feeder(2, CancellationToken::new());

        tokio::task::yield_now().await;
        assert!(queue.lock().await.len() <= 2);

        let mut seen = Vec::new();
        while let Some(task) = next_task(&queue).await {
            seen.push(task.page_index);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(feeder.await.unwrap(), 6);
    }

    #[tokio::test]
    async fn feeder_stops_on_cancel() {
        let source = TaskSource::split(&FixedCount(100), JobId(3), Path::new("a.pdf"), 150)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let (queue, feeder) = source.spawn_feeder(4, cancel.clone());

        let first = next_task(&queue).await.unwrap();
        assert_eq!(first.page_index, 0);
        cancel.cancel();

        let queued = feeder.await.unwrap();
        assert!(queued < 100, "feeder kept going after cancel: {queued}");
    }
}
