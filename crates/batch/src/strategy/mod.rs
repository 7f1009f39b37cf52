//! Execution strategies and the per-item plumbing they share.

pub(crate) mod chunked;
pub(crate) mod concurrent;
pub(crate) mod sequential;
pub(crate) mod streaming;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::{BatchAborted, ItemError, RunError};
use crate::options::{EngineErrorHandler, ErrorHandler, ProgressCallback};
use crate::result::{BatchResult, Completion};
use crate::retry::{self, Attempted, RetryPlan};

/// Terminal failure hook in effect for a run.
pub(crate) enum ErrorHook<T> {
    Run(ErrorHandler<T>),
    Engine(EngineErrorHandler),
    Passthrough,
}

impl<T> Clone for ErrorHook<T> {
    fn clone(&self) -> Self {
        match self {
            ErrorHook::Run(handler) => ErrorHook::Run(handler.clone()),
            ErrorHook::Engine(handler) => ErrorHook::Engine(handler.clone()),
            ErrorHook::Passthrough => ErrorHook::Passthrough,
        }
    }
}

impl<T: WorkItem> ErrorHook<T> {
    pub(crate) fn new(run: Option<ErrorHandler<T>>, engine: Option<&EngineErrorHandler>) -> Self {
        match (run, engine) {
            (Some(handler), _) => ErrorHook::Run(handler),
            (None, Some(handler)) => ErrorHook::Engine(handler.clone()),
            (None, None) => ErrorHook::Passthrough,
        }
    }

    fn handle(&self, error: ItemError, item: &T, index: usize) -> ItemError {
        match self {
            ErrorHook::Run(handler) => handler(error, item, index),
            ErrorHook::Engine(handler) => handler(error, item as &dyn core::fmt::Debug, index),
            ErrorHook::Passthrough => error,
        }
    }
}

/// Everything a strategy needs besides the items and the scope.
pub(crate) struct RunContext<T, P: ?Sized> {
    pub(crate) processor: Arc<P>,
    pub(crate) plan: RetryPlan,
    pub(crate) hook: ErrorHook<T>,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) stop_on_error: bool,
}

impl<T, P> RunContext<T, P>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    /// Run a validated item through the retry loop and the error hook.
    pub(crate) async fn run_item(
        &self,
        cancel: &CancellationToken,
        index: usize,
        item: T,
    ) -> Completion<T> {
        let attempted =
            retry::run_with_retry(self.processor.as_ref(), cancel, &item, index, &self.plan).await;
        self.settle(index, item, attempted)
    }

    /// Turn a retry outcome into a terminal completion. A failure stays a
    /// failure; the error hook only decides which error is recorded.
    pub(crate) fn settle(&self, index: usize, item: T, attempted: Attempted) -> Completion<T> {
        let Err(error) = attempted.outcome else {
            return Completion::Succeeded;
        };
        let error = self.hook.handle(error, &item, index);
        Completion::Failed {
            index,
            item,
            error,
            retries: attempted.retries,
        }
    }

    /// The stop reason for `completion`, when stop-on-error applies to it.
    pub(crate) fn stop_reason(&self, completion: &Completion<T>) -> Option<RunError> {
        if !self.stop_on_error {
            return None;
        }
        match completion {
            Completion::Succeeded => None,
            Completion::Failed { index, error, .. } | Completion::Skipped { index, error, .. } => {
                Some(RunError::Stopped {
                    index: *index,
                    reason: error.to_string(),
                })
            }
        }
    }
}

/// Validate one item: `Ok` hands it back for processing, `Err` is its skip record.
pub(crate) fn validate<T, P>(processor: &P, index: usize, item: T) -> Result<(usize, T), Completion<T>>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    match processor.validate(&item) {
        Ok(()) => Ok((index, item)),
        Err(err) => {
            debug!(index, error = %err, "item failed validation");
            Err(Completion::Skipped {
                index,
                item,
                error: ItemError::Validation(err),
            })
        }
    }
}

/// Validate the whole input before anything runs. Rejected items are
/// recorded as skipped; with stop-on-error the first rejection ends the run.
pub(crate) fn validate_all<T, P>(
    ctx: &RunContext<T, P>,
    items: Vec<T>,
    result: &mut BatchResult<T>,
) -> Result<Vec<(usize, T)>, RunError>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    let mut valid = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match validate(ctx.processor.as_ref(), index, item) {
            Ok(entry) => valid.push(entry),
            Err(skipped) => {
                let stop = ctx.stop_reason(&skipped);
                result.record(skipped);
                if let Some(reason) = stop {
                    return Err(reason);
                }
            }
        }
    }
    Ok(valid)
}

pub(crate) fn aborted<T>(partial: BatchResult<T>, reason: RunError) -> BatchAborted<T> {
    BatchAborted { partial, reason }
}
