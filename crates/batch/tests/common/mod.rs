#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hrops_batch::{BatchProcessor, WorkItem};
use tokio_util::sync::CancellationToken;

/// Processor whose behaviour per item is scripted up front.
///
/// Items are identified by their string form. Unscripted items succeed.
#[derive(Default)]
pub struct ScriptedProcessor {
    always_fail: HashSet<String>,
    fail_times: HashMap<String, u32>,
    invalid: HashSet<String>,
    delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    on_error_calls: Mutex<HashMap<String, u32>>,
    on_success_calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt on these items fails with a permanent error.
    pub fn failing<'a>(mut self, items: impl IntoIterator<Item = &'a str>) -> Self {
        self.always_fail
            .extend(items.into_iter().map(str::to_string));
        self
    }

    /// The first `times` attempts on `item` fail with a transient error.
    pub fn flaky(mut self, item: &str, times: u32) -> Self {
        self.fail_times.insert(item.to_string(), times);
        self
    }

    /// These items fail validation.
    pub fn rejecting<'a>(mut self, items: impl IntoIterator<Item = &'a str>) -> Self {
        self.invalid.extend(items.into_iter().map(str::to_string));
        self
    }

    /// Every attempt takes `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self, item: &str) -> u32 {
        count(&self.attempts, item)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }

    pub fn on_error_calls(&self, item: &str) -> u32 {
        count(&self.on_error_calls, item)
    }

    pub fn on_success_calls(&self, item: &str) -> u32 {
        count(&self.on_success_calls, item)
    }
}

fn count(map: &Mutex<HashMap<String, u32>>, item: &str) -> u32 {
    map.lock().unwrap().get(item).copied().unwrap_or(0)
}

fn bump(map: &Mutex<HashMap<String, u32>>, item: &str) -> u32 {
    let mut map = map.lock().unwrap();
    let n = map.entry(item.to_string()).or_insert(0);
    *n += 1;
    *n
}

#[async_trait]
impl<T> BatchProcessor<T> for ScriptedProcessor
where
    T: WorkItem + AsRef<str>,
{
    fn validate(&self, item: &T) -> anyhow::Result<()> {
        if self.invalid.contains(item.as_ref()) {
            anyhow::bail!("{} is not a valid record", item.as_ref());
        }
        Ok(())
    }

    async fn process(&self, _cancel: &CancellationToken, item: &T) -> anyhow::Result<()> {
        let key = item.as_ref();
        let attempt = bump(&self.attempts, key);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.always_fail.contains(key) {
            anyhow::bail!("permanent failure for {key}");
        }
        if let Some(times) = self.fail_times.get(key) {
            if attempt <= *times {
                anyhow::bail!("connection reset by peer (attempt {attempt})");
            }
        }
        Ok(())
    }

    async fn on_error(
        &self,
        _cancel: &CancellationToken,
        item: &T,
        error: anyhow::Error,
    ) -> anyhow::Error {
        bump(&self.on_error_calls, item.as_ref());
        error
    }

    async fn on_success(&self, _cancel: &CancellationToken, item: &T) -> anyhow::Result<()> {
        bump(&self.on_success_calls, item.as_ref());
        Ok(())
    }
}

pub fn init_tracing() {
    hrops_observability::init();
}
