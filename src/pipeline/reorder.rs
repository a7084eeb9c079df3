//! Reorder buffer: out-of-order page results in, strictly ordered pages out.
//!
//! Workers finish pages in whatever order rasterisation happens to take.
//! The buffer holds early finishers in a map keyed by page index and keeps a
//! single cursor, `expected_next`, at the lowest page not yet released.
//! [`ReorderBuffer::drain`] hands out the contiguous run starting at the
//! cursor, so its output is ascending with no gaps and no repeats, whatever
//! the interleaving of [`ReorderBuffer::accept`] callers.
//!
//! ## Backpressure
//!
//! At most `capacity` results are held at once. One of those slots is kept
//! for the page at the cursor: a page that is *not* the next one may only
//! enter while fewer than `capacity - 1` pages are held, otherwise its worker
//! waits for a drain. The page at the cursor is always admitted, so a slow
//! low page can delay the pipeline but never deadlock it, and the bound is
//! never exceeded.
//!
//! ## Locking
//!
//! All state sits behind one `std::sync::Mutex`, held only for map
//! operations. Waiting happens on `tokio::sync::Notify`, outside the lock.

use crate::error::PipelineError;
use crate::output::PageResult;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Why a result was not stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceptError {
    /// The job was cancelled while waiting for room.
    #[error("cancelled while waiting for buffer space")]
    Cancelled,

    /// The buffer was closed; results are discarded.
    #[error("reorder buffer is closed")]
    Closed,

    /// A result for this page was already accepted.
    #[error("page {page} was already accepted")]
    Duplicate { page: usize },

    #[error("page {page} is out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },
}

/// Metrics view taken under the buffer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub expected_next: usize,
    pub pending: usize,
    pub peak_pending: usize,
    pub accepted: usize,
    pub total_pages: usize,
    pub closed: bool,
}

#[derive(Debug)]
struct BufferState {
    expected_next: usize,
    pending: HashMap<usize, PageResult>,
    accepted: usize,
    peak_pending: usize,
    closed: bool,
}

/// Bounded, order-restoring hand-off between workers and the consumer.
#[derive(Debug)]
pub struct ReorderBuffer {
    capacity: usize,
    total_pages: usize,
    state: Mutex<BufferState>,
    /// Signalled when a drain or close frees space.
    space: Notify,
    /// Signalled when a result lands or the buffer closes.
    ready: Notify,
}

impl ReorderBuffer {
    /// Create a buffer for `total_pages` pages holding at most `capacity`.
    ///
    /// Storage for `min(capacity, total_pages)` entries is reserved up front;
    /// failing to reserve it is a [`PipelineError::Capacity`].
    pub fn new(total_pages: usize, capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::Capacity {
                requested: capacity,
                detail: "capacity must be at least 1".into(),
            });
        }
        let mut pending = HashMap::new();
        pending
            .try_reserve(capacity.min(total_pages))
            .map_err(|e| PipelineError::Capacity {
                requested: capacity,
                detail: e.to_string(),
            })?;

        Ok(Self {
            capacity,
            total_pages,
            state: Mutex::new(BufferState {
                expected_next: 0,
                pending,
                accepted: 0,
                peak_pending: 0,
                closed: false,
            }),
            space: Notify::new(),
            ready: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `result`, waiting for room when the buffer is full and the page
    /// is not the one at the cursor.
    pub async fn accept(
        &self,
        result: PageResult,
        cancel: &CancellationToken,
    ) -> Result<(), AcceptError> {
        let mut result = result;
        loop {
            if cancel.is_cancelled() {
                return Err(AcceptError::Cancelled);
            }
            // Register interest before checking, so a drain between the
            // check and the await still wakes us.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_accept(result)? {
                None => return Ok(()),
                Some(back) => result = back,
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcceptError::Cancelled),
                _ = notified.as_mut() => {}
            }
        }
    }

    /// Non-blocking accept. Returns the result back when there is no room.
    pub fn try_accept(&self, result: PageResult) -> Result<Option<PageResult>, AcceptError> {
        let page = result.page_index();
        let mut state = self.lock();

        if state.closed {
            return Err(AcceptError::Closed);
        }
        if page >= self.total_pages {
            return Err(AcceptError::OutOfRange {
                page,
                total: self.total_pages,
            });
        }
        if page < state.expected_next || state.pending.contains_key(&page) {
            return Err(AcceptError::Duplicate { page });
        }

        let admissible =
            page == state.expected_next || state.pending.len() + 1 < self.capacity;
        if !admissible {
            return Ok(Some(result));
        }

        state.pending.insert(page, result);
        state.accepted += 1;
        state.peak_pending = state.peak_pending.max(state.pending.len());
        let at_cursor = page == state.expected_next;
        drop(state);

        if at_cursor {
            self.ready.notify_one();
        }
        Ok(None)
    }

    /// Remove and return the contiguous run starting at the cursor.
    ///
    /// Empty when the page at the cursor has not arrived yet.
    pub fn drain(&self) -> Vec<PageResult> {
        let run = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut run = Vec::new();
            while let Some(result) = state.pending.remove(&state.expected_next) {
                state.expected_next += 1;
                run.push(result);
            }
            run
        };

        if !run.is_empty() {
            self.space.notify_waiters();
        }
        run
    }

    /// Wait until the page at the cursor may be available.
    ///
    /// Returns `false` when `cancel` fires or the buffer is closed. Wakeups
    /// can be spurious; callers drain and check again.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
        if self.lock().closed {
            return false;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.ready.notified() => !self.lock().closed,
        }
    }

    /// Drop every held result and refuse further accepts.
    ///
    /// Returns how many results were discarded.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending = HashMap::new();
        drop(state);

        self.space.notify_waiters();
        self.ready.notify_one();
        dropped
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.lock();
        BufferSnapshot {
            expected_next: state.expected_next,
            pending: state.pending.len(),
            peak_pending: state.peak_pending,
            accepted: state.accepted,
            total_pages: self.total_pages,
            closed: state.closed,
        }
    }
}
