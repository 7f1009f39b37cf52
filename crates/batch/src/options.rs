//! Per-run options and the hook types the engine accepts.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ItemError;

/// Progress hook: `(processed, total, percentage)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, f64) + Send + Sync>;

/// Per-run terminal failure hook: `(error, item, index)`.
///
/// The item stays failed; the returned error is the one recorded for it.
pub type ErrorHandler<T> = Arc<dyn Fn(ItemError, &T, usize) -> ItemError + Send + Sync>;

/// Engine-wide failure hook used when a run does not provide its own.
///
/// The engine is shared across item types, so the item is only visible
/// through its `Debug` form.
pub type EngineErrorHandler =
    Arc<dyn Fn(ItemError, &dyn core::fmt::Debug, usize) -> ItemError + Send + Sync>;

/// Engine-wide retry policy: `(error, retries so far)` to `Some(delay)` to
/// retry after `delay`, or `None` to give up.
pub type RetryPolicy = Arc<dyn Fn(&anyhow::Error, u32) -> Option<Duration> + Send + Sync>;

/// Decides whether a processing error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Caller-supplied retry configuration for one run.
#[derive(Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt (so `max_retries + 1` attempts at most).
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Growth factor; only values above 1 enable scaling.
    pub backoff_factor: f64,
    /// Ceiling applied to scaled delays.
    pub max_retry_delay: Option<Duration>,
    /// Jitter factor (0.0-1.0) spreading delays around the computed value.
    pub jitter: f64,
    /// `None` treats every error as retryable.
    pub retryable: Option<RetryPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_retry_delay: None,
            jitter: 0.0,
            retryable: None,
        }
    }
}

impl core::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl RetryOptions {
    /// Fixed delay between at most `max_retries` retries.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            ..Default::default()
        }
    }

    /// Scale delays by `factor * attempt`, capped at `max_delay`.
    pub fn with_backoff(mut self, factor: f64, max_delay: Duration) -> Self {
        self.backoff_factor = factor;
        self.max_retry_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Only retry errors accepted by `predicate`.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    pub fn is_retryable(&self, error: &anyhow::Error) -> bool {
        self.retryable.as_ref().is_none_or(|predicate| predicate(error))
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_delay.as_millis() as f64;

        let delay_ms = if self.backoff_factor > 1.0 {
            let scaled = base_ms * f64::from(attempt) * self.backoff_factor;
            match self.max_retry_delay {
                Some(cap) => scaled.min(cap.as_millis() as f64),
                None => scaled,
            }
        } else {
            base_ms
        };

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            // Deterministic spread derived from the attempt number.
            let pseudo_random = ((f64::from(attempt) * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Options for a single batch run. Every field has a usable default.
pub struct BatchOptions<T> {
    /// Worker count; 1 (the default) runs sequentially.
    pub concurrency: usize,
    /// When non-zero and `concurrency <= 1`, the run uses the chunked strategy.
    ///
    /// Chunked runs go through the engine's retry policy and error handler
    /// and validate each item as its chunk reaches it, so `retry`,
    /// `error_handler` and `stop_on_error` have no effect there. Only
    /// `progress` (reported once per chunk) and `timeout` carry over.
    pub chunk_size: usize,
    /// `None` selects the engine's retry policy.
    pub retry: Option<RetryOptions>,
    pub progress: Option<ProgressCallback>,
    /// `None` falls back to the engine's error handler.
    pub error_handler: Option<ErrorHandler<T>>,
    /// Abort the run after the first item that fails validation or processing.
    pub stop_on_error: bool,
    /// Overall deadline for the run.
    pub timeout: Option<Duration>,
}

impl<T> Default for BatchOptions<T> {
    fn default() -> Self {
        Self {
            concurrency: 1,
            chunk_size: 0,
            retry: None,
            progress: None,
            error_handler: None,
            stop_on_error: false,
            timeout: None,
        }
    }
}

impl<T> Clone for BatchOptions<T> {
    fn clone(&self) -> Self {
        Self {
            concurrency: self.concurrency,
            chunk_size: self.chunk_size,
            retry: self.retry.clone(),
            progress: self.progress.clone(),
            error_handler: self.error_handler.clone(),
            stop_on_error: self.stop_on_error,
            timeout: self.timeout,
        }
    }
}

impl<T> core::fmt::Debug for BatchOptions<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("retry", &self.retry)
            .field("progress", &self.progress.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("stop_on_error", &self.stop_on_error)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> BatchOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize, f64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ItemError, &T, usize) -> ItemError + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
