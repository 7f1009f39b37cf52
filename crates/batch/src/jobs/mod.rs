//! Batch job registry.
//!
//! Tracks the lifecycle of batch runs independently of the strategy used to
//! execute them: `pending` on creation, `running` once progress is reported,
//! then exactly one of `completed`, `failed` or `cancelled`.
//!
//! The registry is injected wherever it is needed; records are only removed
//! through [`BatchJobStore::remove_batch_job`] or
//! [`BatchJobStore::purge_finished`].

pub mod store;
pub mod types;

pub use store::{BatchJobStore, InMemoryBatchJobStore, JobStoreError};
pub use types::{BatchJob, BatchJobStats, BatchJobStatus};
