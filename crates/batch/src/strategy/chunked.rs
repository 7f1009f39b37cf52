//! Fixed-size chunks, each processed sequentially, with per-chunk progress.

use tracing::debug;

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::BatchAborted;
use crate::result::BatchResult;
use crate::scope::RunScope;

use super::{RunContext, aborted, validate};

pub(crate) async fn run<T, P>(
    ctx: &RunContext<T, P>,
    scope: &RunScope,
    items: Vec<T>,
    chunk_size: usize,
    mut result: BatchResult<T>,
) -> Result<BatchResult<T>, BatchAborted<T>>
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    // 0 means "everything in one chunk".
    let size = if chunk_size == 0 {
        items.len().max(1)
    } else {
        chunk_size
    };
    let total_chunks = items.len().div_ceil(size);
    let mut items = items.into_iter().enumerate().peekable();
    let mut chunk = 0usize;

    while items.peek().is_some() {
        if scope.is_done() {
            stamp(&mut result, size, chunk);
            return Err(aborted(result, scope.reason()));
        }

        let mut chunk_result = BatchResult::new(0);
        for (index, item) in items.by_ref().take(size) {
            let completion = match validate(ctx.processor.as_ref(), index, item) {
                Ok((index, item)) => ctx.run_item(scope.token(), index, item).await,
                Err(skipped) => skipped,
            };
            chunk_result.record(completion);
        }

        chunk += 1;
        debug!(
            chunk,
            total_chunks,
            processed = chunk_result.processed_items,
            failed = chunk_result.failed_items,
            skipped = chunk_result.skipped_items,
            "chunk finished"
        );

        result.absorb(chunk_result);
        result.report_progress(ctx.progress.as_ref());
    }

    stamp(&mut result, size, chunk);
    // A cancel or timeout during the last chunk still ends the run as aborted.
    match scope.interruption() {
        Some(reason) => Err(aborted(result, reason)),
        None => Ok(result),
    }
}

fn stamp<T>(result: &mut BatchResult<T>, size: usize, chunks: usize) {
    result
        .metadata
        .insert("chunk_size".into(), serde_json::json!(size));
    result
        .metadata
        .insert("chunks".into(), serde_json::json!(chunks));
}
