//! Items pulled from a channel until it closes or the scope is cancelled.

use tokio::sync::mpsc;

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::BatchAborted;
use crate::result::BatchResult;
use crate::scope::RunScope;

use super::{RunContext, aborted, validate};

pub(crate) async fn run<T, P>(
    ctx: &RunContext<T, P>,
    scope: &RunScope,
    mut source: mpsc::Receiver<T>,
    mut result: BatchResult<T>,
) -> Result<BatchResult<T>, BatchAborted<T>>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    let mut index = 0usize;

    loop {
        let received = tokio::select! {
            biased;
            _ = scope.done() => None,
            item = source.recv() => Some(item),
        };

        let item = match received {
            None => return Err(aborted(result, scope.reason())),
            Some(None) => return Ok(result),
            Some(Some(item)) => item,
        };

        result.total_items += 1;
        let completion = match validate(ctx.processor.as_ref(), index, item) {
            Ok((index, item)) => ctx.run_item(scope.token(), index, item).await,
            Err(skipped) => skipped,
        };
        result.record(completion);
        result.report_progress(ctx.progress.as_ref());
        index += 1;
    }
}
