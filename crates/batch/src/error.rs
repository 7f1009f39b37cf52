//! Error taxonomy of the batch engine.

use std::time::Duration;

use thiserror::Error;

use crate::contract::WorkItem;
use crate::result::BatchResult;

/// Terminal failure of a single item, recorded in [`BatchResult::errors`].
#[derive(Debug, Error)]
pub enum ItemError {
    /// The item was rejected before any attempt (counted as skipped).
    #[error("validation failed: {0}")]
    Validation(#[source] anyhow::Error),

    /// An attempt failed and was not retried further: the error was not
    /// retryable, the run was cancelled during backoff, or an error handler
    /// replaced the failure.
    #[error("processing failed: {0}")]
    Processing(#[source] anyhow::Error),

    /// Every attempt the retry policy allowed has failed.
    #[error("gave up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl ItemError {
    /// The processor error behind this failure.
    pub fn cause(&self) -> &anyhow::Error {
        match self {
            ItemError::Validation(err) | ItemError::Processing(err) => err,
            ItemError::RetryExhausted { source, .. } => source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ItemError::Validation(_))
    }
}

/// Why a batch run ended before every item had an outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The caller's cancellation token fired.
    #[error("batch cancelled")]
    Cancelled,

    /// The run's own timeout elapsed.
    #[error("batch timed out after {0:?}")]
    TimedOut(Duration),

    /// `stop_on_error` was set and an item failed.
    #[error("batch stopped early after item {index} failed: {reason}")]
    Stopped { index: usize, reason: String },

    /// A concurrent worker panicked while processing an item.
    #[error("worker panicked while processing item {index}")]
    WorkerPanicked { index: usize },
}

impl RunError {
    /// True for cancellation and timeout, which share the same semantics.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::Cancelled | RunError::TimedOut(_))
    }
}

/// A batch run that ended early, with everything it managed to do.
#[derive(Debug)]
pub struct BatchAborted<T> {
    /// Counts and errors accumulated before the run stopped.
    pub partial: BatchResult<T>,
    pub reason: RunError,
}

impl<T> BatchAborted<T> {
    pub fn into_parts(self) -> (BatchResult<T>, RunError) {
        (self.partial, self.reason)
    }
}

impl<T> core::fmt::Display for BatchAborted<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "batch aborted after {} of {} item(s): {}",
            self.partial.processed_items + self.partial.skipped_items,
            self.partial.total_items,
            self.reason
        )
    }
}

impl<T: WorkItem> std::error::Error for BatchAborted<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}
