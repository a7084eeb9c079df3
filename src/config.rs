//! Configuration types for the print pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One config is shared by every job a
//! [`crate::controller::PrintPipeline`] runs; the per-job inputs (document
//! and dpi) are passed to `submit`.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lowest accepted rendering DPI.
pub const MIN_DPI: u32 = 72;
/// Highest accepted rendering DPI.
pub const MAX_DPI: u32 = 600;

/// What the consumer does when a page fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the job in `Failed` and submit nothing further.
    AbortOnFailure,
    /// Record the failure, leave the page out and keep printing. (default)
    #[default]
    SkipAndContinue,
}

/// Configuration for a [`crate::controller::PrintPipeline`].
///
/// # Example
/// ```rust
/// use pagepress::{FailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .worker_count(4)
///     .buffer_capacity(8)
///     .failure_policy(FailurePolicy::AbortOnFailure)
///     .device_id("office-laser")
///     .build()
///     .unwrap();
/// assert_eq!(config.worker_count, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Number of concurrent conversion workers. Default: available parallelism.
    ///
    /// Bounds peak transient memory to roughly
    /// `worker_count × average page image size`.
    pub worker_count: usize,

    /// Maximum number of converted pages held out of order. Default: `2 × worker_count`.
    pub buffer_capacity: usize,

    /// Task queue capacity is `worker_count × queue_multiplier`. Default: 2.
    pub queue_multiplier: usize,

    /// Behaviour on a permanent page failure. Default: [`FailurePolicy::SkipAndContinue`].
    pub failure_policy: FailurePolicy,

    /// Rendering DPI used when `submit` is not given one. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 10 000.
    ///
    /// A 600-DPI render of an A0 poster would otherwise allocate gigabytes.
    pub max_rendered_pixels: u32,

    /// Rasterisation retries per page (R). Default: 3.
    pub max_retries: u32,

    /// Initial rasterisation retry delay; doubles every attempt. Default: 250.
    pub retry_backoff_ms: u64,

    /// Submission retries per page (R2). Default: 2.
    pub submit_retries: u32,

    /// Initial submission retry delay; doubles every attempt. Default: 500.
    pub submit_backoff_ms: u64,

    /// Time the consumer waits for a device acknowledgment. Default: 60.
    pub submit_timeout_secs: u64,

    /// Target output device (CUPS queue name, spool folder label, ...). Default: `"default"`.
    pub device_id: String,

    /// Download timeout for URL documents in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = default_worker_count();
        Self {
            worker_count: workers,
            buffer_capacity: workers * 2,
            queue_multiplier: 2,
            failure_policy: FailurePolicy::default(),
            dpi: 300,
            max_rendered_pixels: 10_000,
            max_retries: 3,
            retry_backoff_ms: 250,
            submit_retries: 2,
            submit_backoff_ms: 500,
            submit_timeout_secs: 60,
            device_id: "default".to_string(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("worker_count", &self.worker_count)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("queue_multiplier", &self.queue_multiplier)
            .field("failure_policy", &self.failure_policy)
            .field("dpi", &self.dpi)
            .field("max_retries", &self.max_retries)
            .field("submit_retries", &self.submit_retries)
            .field("submit_timeout_secs", &self.submit_timeout_secs)
            .field("device_id", &self.device_id)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PrintProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            explicit_buffer: false,
        }
    }

    /// Capacity of the bounded task queue.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count.saturating_mul(self.queue_multiplier).max(1)
    }

    /// Delay before rasterisation retry `attempt` (1-based).
    pub fn conversion_backoff(&self, attempt: u32) -> Duration {
        exponential_backoff(self.retry_backoff_ms, attempt)
    }

    /// Delay before submission retry `attempt` (1-based).
    pub fn submit_backoff(&self, attempt: u32) -> Duration {
        exponential_backoff(self.submit_backoff_ms, attempt)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `base_ms × 2^(attempt-1)`, saturating.
fn exponential_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    explicit_buffer: bool,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n;
        if !self.explicit_buffer {
            self.config.buffer_capacity = n.saturating_mul(2);
        }
        self
    }

    pub fn buffer_capacity(mut self, n: usize) -> Self {
        self.config.buffer_capacity = n;
        self.explicit_buffer = true;
        self
    }

    pub fn queue_multiplier(mut self, n: usize) -> Self {
        self.config.queue_multiplier = n.max(1);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn submit_retries(mut self, n: u32) -> Self {
        self.config.submit_retries = n;
        self
    }

    pub fn submit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.submit_backoff_ms = ms;
        self
    }

    pub fn submit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.submit_timeout_secs = secs;
        self
    }

    pub fn device_id(mut self, device: impl Into<String>) -> Self {
        self.config.device_id = device.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.worker_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker count must be ≥ 1".into(),
            ));
        }
        if c.buffer_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "buffer capacity must be ≥ 1".into(),
            ));
        }
        if c.submit_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "submit timeout must be ≥ 1s".into(),
            ));
        }
        if c.device_id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "device id must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
