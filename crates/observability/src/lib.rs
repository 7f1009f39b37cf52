//! Tracing/logging setup shared by every process embedding the batch engine.

/// Initialize process-wide observability from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&tracing::LogConfig::from_env());
}

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat};
