//! Bounded worker pool with a single result collector.
//!
//! A dispatch loop acquires a semaphore permit per item and spawns a worker
//! into a `JoinSet`. Workers send their outcome, together with their permit,
//! over a channel; only the collector touches the aggregate, so errors land in
//! completion order. The permit is released once the collector has recorded
//! the outcome, so a stop decided there is seen before the next item starts.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::error;

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::{BatchAborted, RunError};
use crate::result::BatchResult;
use crate::retry::{self, Attempted};
use crate::scope::RunScope;

use super::{RunContext, aborted};

struct WorkerReport<T> {
    outcome: WorkerOutcome<T>,
    permit: OwnedSemaphorePermit,
}

enum WorkerOutcome<T> {
    Finished {
        index: usize,
        item: T,
        attempted: Attempted,
    },
    Panicked {
        index: usize,
    },
}

pub(crate) async fn run<T, P>(
    ctx: &RunContext<T, P>,
    scope: &RunScope,
    items: Vec<(usize, T)>,
    concurrency: usize,
    mut result: BatchResult<T>,
) -> Result<BatchResult<T>, BatchAborted<T>>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized + 'static,
{
    let concurrency = concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::channel::<WorkerReport<T>>(concurrency);
    let mut workers = JoinSet::new();

    let dispatch = async {
        let tx = tx;
        for (index, item) in items {
            let permit = tokio::select! {
                biased;
                _ = scope.done() => return true,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return true,
                },
            };

            let processor = ctx.processor.clone();
            let plan = ctx.plan.clone();
            let cancel = scope.token().clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let attempted = AssertUnwindSafe(retry::run_with_retry(
                    processor.as_ref(),
                    &cancel,
                    &item,
                    index,
                    &plan,
                ))
                .catch_unwind()
                .await;

                let outcome = match attempted {
                    Ok(attempted) => WorkerOutcome::Finished {
                        index,
                        item,
                        attempted,
                    },
                    Err(_) => WorkerOutcome::Panicked { index },
                };
                let _ = tx.send(WorkerReport { outcome, permit }).await;
            });
        }
        false
    };

    let collect = async {
        let mut panicked = None;
        let mut stopped = None;

        while let Some(WorkerReport { outcome, permit }) = rx.recv().await {
            match outcome {
                WorkerOutcome::Finished {
                    index,
                    item,
                    attempted,
                } => {
                    let completion = ctx.settle(index, item, attempted);
                    if stopped.is_none() {
                        stopped = ctx.stop_reason(&completion);
                        if stopped.is_some() {
                            scope.stop();
                        }
                    }
                    result.record(completion);
                    result.report_progress(ctx.progress.as_ref());
                }
                WorkerOutcome::Panicked { index } => {
                    error!(index, "batch worker panicked");
                    panicked.get_or_insert(RunError::WorkerPanicked { index });
                    scope.stop();
                }
            }
            drop(permit);
        }

        (panicked, stopped)
    };

    let (interrupted, (panicked, stopped)) = tokio::join!(dispatch, collect);

    // Every worker has reported by now; reap the finished tasks.
    while workers.join_next().await.is_some() {}

    result
        .metadata
        .insert("concurrency".into(), serde_json::json!(concurrency));

    if let Some(reason) = panicked {
        return Err(aborted(result, reason));
    }
    if let Some(reason) = scope.interruption() {
        return Err(aborted(result, reason));
    }
    if let Some(reason) = stopped {
        return Err(aborted(result, reason));
    }
    if interrupted {
        return Err(aborted(result, scope.reason()));
    }
    Ok(result)
}
