//! `hrops-batch`: generic batch execution engine.
//!
//! Runs an arbitrary collection of work items through a caller-supplied
//! [`BatchProcessor`], using one of four strategies:
//!
//! - **Sequential**: input order on the calling task, optional stop-on-error
//! - **Concurrent**: bounded worker pool, single result collector
//! - **Chunked**: fixed-size chunks with per-chunk progress
//! - **Streaming**: items pulled from a channel until it closes or the run is cancelled
//!
//! Every strategy applies validation, retry with backoff and the error hooks
//! uniformly, and reports a [`BatchResult`] even when the run is aborted.
//! Job lifecycle tracking lives in [`jobs`] and is independent of the strategy.

pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod options;
pub mod result;
pub mod retry;

mod scope;
mod strategy;

pub use config::{BatchConfig, ConfigError};
pub use contract::{BatchProcessor, WorkItem};
pub use engine::BatchEngine;
pub use error::{BatchAborted, ItemError, RunError};
pub use jobs::{
    BatchJob, BatchJobStats, BatchJobStatus, BatchJobStore, InMemoryBatchJobStore, JobStoreError,
};
pub use options::{
    BatchOptions, EngineErrorHandler, ErrorHandler, ProgressCallback, RetryOptions, RetryPolicy,
    RetryPredicate,
};
pub use result::{BatchError, BatchResult, BatchSummary};
pub use retry::is_transient;

pub use hrops_core::{BatchJobId, Metadata};
