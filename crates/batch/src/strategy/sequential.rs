//! One item at a time, in input order, on the calling task.

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::BatchAborted;
use crate::result::BatchResult;
use crate::scope::RunScope;

use super::{RunContext, aborted};

pub(crate) async fn run<T, P>(
    ctx: &RunContext<T, P>,
    scope: &RunScope,
    items: Vec<(usize, T)>,
    mut result: BatchResult<T>,
) -> Result<BatchResult<T>, BatchAborted<T>>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    for (index, item) in items {
        if scope.is_done() {
            return Err(aborted(result, scope.reason()));
        }

        let completion = ctx.run_item(scope.token(), index, item).await;
        let stop = ctx.stop_reason(&completion);
        result.record(completion);
        result.report_progress(ctx.progress.as_ref());

        if let Some(reason) = stop {
            return Err(aborted(result, reason));
        }
    }

    match scope.interruption() {
        Some(reason) => Err(aborted(result, reason)),
        None => Ok(result),
    }
}
