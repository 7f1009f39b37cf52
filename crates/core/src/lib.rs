//! `hrops-core`: shared building blocks for the batch subsystem.
//!
//! This crate holds identifiers and small value helpers only (no runtime or
//! infrastructure concerns).

pub mod error;
pub mod id;
pub mod metadata;

pub use error::CoreError;
pub use id::BatchJobId;
pub use metadata::{Metadata, merge_metadata};
