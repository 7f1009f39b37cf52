//! Environment-driven defaults for batch runs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_STEP};
use crate::options::BatchOptions;

const ENV_CONCURRENCY: &str = "HROPS_BATCH_CONCURRENCY";
const ENV_CHUNK_SIZE: &str = "HROPS_BATCH_CHUNK_SIZE";
const ENV_TIMEOUT_SECS: &str = "HROPS_BATCH_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "HROPS_BATCH_MAX_RETRIES";
const ENV_RETRY_STEP_MS: &str = "HROPS_BATCH_RETRY_STEP_MS";
const ENV_JOB_TIMEOUTS: &str = "HROPS_BATCH_JOB_TIMEOUTS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: expected name=seconds pairs, got {entry:?}")]
    InvalidJobTimeout { key: &'static str, entry: String },
}

/// Batch defaults shared by scheduled jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Chunk size handed to [`BatchOptions`]; it only selects the chunked
    /// strategy when `concurrency` is 1 or less.
    pub chunk_size: usize,
    /// Default overall timeout, in seconds.
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub retry_step_ms: u64,
    /// Per-job overrides of `timeout_secs`, keyed by job name.
    pub job_timeouts: BTreeMap<String, u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            chunk_size: 100,
            timeout_secs: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_step_ms: DEFAULT_RETRY_STEP.as_millis() as u64,
            job_timeouts: BTreeMap::new(),
        }
    }
}

impl BatchConfig {
    /// Read `HROPS_BATCH_*` variables, falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let number = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
            }
        };

        let concurrency = number(ENV_CONCURRENCY)?
            .map(|n| n as usize)
            .unwrap_or(defaults.concurrency);
        let chunk_size = number(ENV_CHUNK_SIZE)?
            .map(|n| n as usize)
            .unwrap_or(defaults.chunk_size);
        let timeout_secs = number(ENV_TIMEOUT_SECS)?.or(defaults.timeout_secs);
        let max_retries = match number(ENV_MAX_RETRIES)? {
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_MAX_RETRIES,
                value: n.to_string(),
            })?,
            None => defaults.max_retries,
        };
        let retry_step_ms = number(ENV_RETRY_STEP_MS)?.unwrap_or(defaults.retry_step_ms);
        let job_timeouts = match lookup(ENV_JOB_TIMEOUTS) {
            Some(raw) => parse_job_timeouts(&raw)?,
            None => defaults.job_timeouts,
        };

        Ok(Self {
            concurrency,
            chunk_size,
            timeout_secs,
            max_retries,
            retry_step_ms,
            job_timeouts,
        })
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }

    /// Timeout for `job_name`: its override if any, else the default.
    pub fn timeout_for(&self, job_name: &str) -> Option<Duration> {
        self.job_timeouts
            .get(job_name)
            .copied()
            .or(self.timeout_secs)
            .map(Duration::from_secs)
    }

    /// Options matching this configuration: concurrency, chunk size and
    /// default timeout.
    pub fn options<T>(&self) -> BatchOptions<T> {
        let mut options = BatchOptions::new()
            .with_concurrency(self.concurrency)
            .with_chunk_size(self.chunk_size);
        options.timeout = self.timeout_secs.map(Duration::from_secs);
        options
    }
}

fn parse_job_timeouts(raw: &str) -> Result<BTreeMap<String, u64>, ConfigError> {
    let mut timeouts = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || ConfigError::InvalidJobTimeout {
            key: ENV_JOB_TIMEOUTS,
            entry: entry.to_string(),
        };
        let (name, secs) = entry.split_once('=').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }
        let secs = secs.trim().parse::<u64>().map_err(|_| invalid())?;
        timeouts.insert(name.to_string(), secs);
    }
    Ok(timeouts)
}
