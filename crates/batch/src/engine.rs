//! The batch engine: entry points, strategy routing and engine-level hooks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::contract::{BatchProcessor, WorkItem};
use crate::error::{BatchAborted, ItemError};
use crate::options::{BatchOptions, EngineErrorHandler, ProgressCallback, RetryOptions, RetryPolicy};
use crate::result::BatchResult;
use crate::retry::{RetryPlan, default_retry_policy};
use crate::scope::RunScope;
use crate::strategy::{self, ErrorHook, RunContext};

/// Retries allowed by the built-in policy.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Linear backoff step of the built-in policy.
pub const DEFAULT_RETRY_STEP: Duration = Duration::from_secs(1);

type Outcome<T> = Result<BatchResult<T>, BatchAborted<T>>;

/// Runs batches of work items through a [`BatchProcessor`].
///
/// The engine is cheap to clone and holds no per-run state. Every entry
/// point returns the accumulated [`BatchResult`], either as the success value
/// or inside [`BatchAborted`] when the run ended early.
#[derive(Clone)]
pub struct BatchEngine {
    retry_policy: RetryPolicy,
    error_handler: Option<EngineErrorHandler>,
}

impl Default for BatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchEngine {
    /// Engine with the built-in retry policy (3 retries, 1s/2s/3s) and no
    /// error handler.
    pub fn new() -> Self {
        Self {
            retry_policy: default_retry_policy(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STEP),
            error_handler: None,
        }
    }

    /// Engine whose default retry policy follows `config`.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            retry_policy: default_retry_policy(config.max_retries, config.retry_step()),
            error_handler: None,
        }
    }

    /// Handler for terminal failures of runs that do not bring their own.
    /// It is the only handler the chunked and streaming strategies use.
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(ItemError, &dyn core::fmt::Debug, usize) -> ItemError + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
    }

    /// Retry policy for runs without [`RetryOptions`].
    pub fn set_retry_policy<F>(&mut self, policy: F)
    where
        F: Fn(&anyhow::Error, u32) -> Option<Duration> + Send + Sync + 'static,
    {
        self.retry_policy = Arc::new(policy);
    }

    /// Process `items` sequentially with default options.
    pub async fn process_batch<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        self.process_batch_with_options(cancel, processor, items, BatchOptions::default())
            .await
    }

    /// Process `items` with explicit options.
    ///
    /// Items are validated up front. `concurrency > 1` selects the concurrent
    /// strategy; otherwise a non-zero `chunk_size` selects the chunked one;
    /// otherwise items run sequentially.
    pub async fn process_batch_with_options<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        options: BatchOptions<T>,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        if options.concurrency <= 1 && options.chunk_size > 0 {
            if options.retry.is_some() || options.error_handler.is_some() || options.stop_on_error {
                warn!(
                    "chunked runs use the engine retry policy and error handler; \
                     retry, error handler and stop_on_error options are ignored"
                );
            }
            return self
                .chunked(
                    cancel,
                    processor,
                    items,
                    options.chunk_size,
                    options.progress,
                    options.timeout,
                )
                .await;
        }

        let strategy = if options.concurrency > 1 {
            "concurrent"
        } else {
            "sequential"
        };
        info!(
            strategy,
            total_items = items.len(),
            concurrency = options.concurrency,
            stop_on_error = options.stop_on_error,
            custom_retry = options.retry.is_some(),
            timeout_ms = options.timeout.map(|t| t.as_millis() as u64),
            "batch started"
        );

        let scope = RunScope::new(cancel, options.timeout);
        let ctx = RunContext {
            processor,
            plan: RetryPlan::new(options.retry, &self.retry_policy),
            hook: ErrorHook::new(options.error_handler, self.error_handler.as_ref()),
            progress: options.progress,
            stop_on_error: options.stop_on_error,
        };

        let mut result = BatchResult::new(items.len());
        let outcome = match strategy::validate_all(&ctx, items, &mut result) {
            Err(reason) => Err(strategy::aborted(result, reason)),
            Ok(valid) if options.concurrency > 1 => {
                strategy::concurrent::run(&ctx, &scope, valid, options.concurrency, result).await
            }
            Ok(valid) => strategy::sequential::run(&ctx, &scope, valid, result).await,
        };

        conclude(strategy, outcome)
    }

    /// Process `items` with at most `concurrency` in flight.
    pub async fn process_concurrent<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        concurrency: usize,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        let options = BatchOptions::new().with_concurrency(concurrency);
        self.process_batch_with_options(cancel, processor, items, options)
            .await
    }

    /// Like [`process_concurrent`](Self::process_concurrent), retrying per `retry`.
    pub async fn process_concurrent_with_retry<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        concurrency: usize,
        retry: RetryOptions,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        let options = BatchOptions::new()
            .with_concurrency(concurrency)
            .with_retry(retry);
        self.process_batch_with_options(cancel, processor, items, options)
            .await
    }

    /// Process `items` in contiguous chunks of `chunk_size` (0 = one chunk).
    pub async fn process_in_chunks<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        chunk_size: usize,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        self.chunked(cancel, processor, items, chunk_size, None, None)
            .await
    }

    /// Like [`process_in_chunks`](Self::process_in_chunks), calling `progress`
    /// with cumulative counts after every chunk.
    pub async fn process_in_chunks_with_progress<T, P, F>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        chunk_size: usize,
        progress: F,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
        F: Fn(usize, usize, f64) + Send + Sync + 'static,
    {
        self.chunked(
            cancel,
            processor,
            items,
            chunk_size,
            Some(Arc::new(progress)),
            None,
        )
        .await
    }

    /// Process items from `source` until it is closed and drained, or until
    /// `cancel` fires.
    pub async fn process_stream<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        source: mpsc::Receiver<T>,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        info!(strategy = "streaming", "batch started");

        let scope = RunScope::new(cancel, None);
        let ctx = self.engine_context(processor, None);
        let outcome =
            strategy::streaming::run(&ctx, &scope, source, BatchResult::new(0)).await;

        conclude("streaming", outcome)
    }

    async fn chunked<T, P>(
        &self,
        cancel: &CancellationToken,
        processor: Arc<P>,
        items: Vec<T>,
        chunk_size: usize,
        progress: Option<ProgressCallback>,
        timeout: Option<Duration>,
    ) -> Outcome<T>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        info!(
            strategy = "chunked",
            total_items = items.len(),
            chunk_size,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "batch started"
        );

        let scope = RunScope::new(cancel, timeout);
        let ctx = self.engine_context(processor, progress);
        let result = BatchResult::new(items.len());
        let outcome = strategy::chunked::run(&ctx, &scope, items, chunk_size, result).await;

        conclude("chunked", outcome)
    }

    fn engine_context<T, P>(
        &self,
        processor: Arc<P>,
        progress: Option<ProgressCallback>,
    ) -> RunContext<T, P>
    where
        T: WorkItem,
        P: BatchProcessor<T> + ?Sized,
    {
        RunContext {
            processor,
            plan: RetryPlan::Policy(self.retry_policy.clone()),
            hook: ErrorHook::new(None, self.error_handler.as_ref()),
            progress,
            stop_on_error: false,
        }
    }
}

/// Stamp the end time and log how the run went.
fn conclude<T>(strategy: &'static str, outcome: Outcome<T>) -> Outcome<T> {
    match outcome {
        Ok(result) => {
            let mut result = result.finish();
            result
                .metadata
                .insert("strategy".into(), serde_json::json!(strategy));
            info!(
                strategy,
                total_items = result.total_items,
                processed = result.processed_items,
                successful = result.successful_items,
                failed = result.failed_items,
                skipped = result.skipped_items,
                duration_ms = result.duration.as_millis() as u64,
                "batch finished"
            );
            Ok(result)
        }
        Err(BatchAborted { partial, reason }) => {
            let mut partial = partial.finish();
            partial
                .metadata
                .insert("strategy".into(), serde_json::json!(strategy));
            warn!(
                strategy,
                reason = %reason,
                total_items = partial.total_items,
                processed = partial.processed_items,
                failed = partial.failed_items,
                skipped = partial.skipped_items,
                duration_ms = partial.duration.as_millis() as u64,
                "batch aborted"
            );
            Err(BatchAborted { partial, reason })
        }
    }
}
