//! The work contract every batch processor implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Bound shared by every item type the engine can run.
///
/// The engine never looks inside an item: it lends `&T` to the processor and
/// moves the value into a [`crate::BatchError`] when the item fails.
pub trait WorkItem: core::fmt::Debug + Send + Sync + 'static {}

impl<T> WorkItem for T where T: core::fmt::Debug + Send + Sync + 'static {}

/// Caller-supplied handler for one kind of work item.
///
/// For every item that passes [`validate`](Self::validate) the engine records
/// exactly one terminal outcome: success after one or more attempts, or
/// failure once the retry policy gives up.
#[async_trait]
pub trait BatchProcessor<T: WorkItem>: Send + Sync {
    /// Cheap pre-check. An error marks the item skipped; it is never
    /// processed and never retried.
    fn validate(&self, _item: &T) -> anyhow::Result<()> {
        Ok(())
    }

    /// Perform the unit of work. May be called more than once per item.
    ///
    /// `cancel` is cancelled when the run is cancelled or times out; long
    /// running implementations should watch it.
    async fn process(&self, cancel: &CancellationToken, item: &T) -> anyhow::Result<()>;

    /// Called after every failed attempt, before the retry decision.
    ///
    /// The returned error replaces the original one for the retry policy and
    /// the result record.
    async fn on_error(
        &self,
        _cancel: &CancellationToken,
        _item: &T,
        error: anyhow::Error,
    ) -> anyhow::Error {
        error
    }

    /// Called once, after `process` finally succeeds. A failing hook is
    /// logged and does not change the item's outcome.
    async fn on_success(&self, _cancel: &CancellationToken, _item: &T) -> anyhow::Result<()> {
        Ok(())
    }
}
