//! Per-item retry loop and the built-in retry policies.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contract::{BatchProcessor, WorkItem};
use crate::error::ItemError;
use crate::options::{RetryOptions, RetryPolicy};

/// Linear backoff: retry while fewer than `max_retries` retries happened,
/// waiting `step * (retries + 1)` before each one.
pub fn default_retry_policy(max_retries: u32, step: Duration) -> RetryPolicy {
    Arc::new(move |_error, retries| {
        (retries < max_retries).then(|| step.saturating_mul(retries.saturating_add(1)))
    })
}

const TRANSIENT_SIGNATURES: &[&str] = &[
    // deadlocks
    "deadlock",
    "40p01",
    // connections
    "connection refused",
    "connection reset",
    "connection closed",
    "server closed",
    "53300",
    // timeouts
    "timeout",
    "timed out",
    "deadline exceeded",
];

/// True when the error chain looks like a deadlock, a dropped connection or a
/// timeout. Usable as a [`RetryOptions::retry_if`] predicate.
pub fn is_transient(error: &anyhow::Error) -> bool {
    let message = format!("{error:#}").to_lowercase();
    TRANSIENT_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Which retry rules apply to a run.
#[derive(Clone)]
pub(crate) enum RetryPlan {
    Policy(RetryPolicy),
    Options(RetryOptions),
}

impl RetryPlan {
    pub(crate) fn new(options: Option<RetryOptions>, fallback: &RetryPolicy) -> Self {
        match options {
            Some(options) => RetryPlan::Options(options),
            None => RetryPlan::Policy(fallback.clone()),
        }
    }

    fn decide(&self, error: anyhow::Error, retries: u32) -> Decision {
        let attempts = retries + 1;
        match self {
            RetryPlan::Policy(policy) => match policy(&error, retries) {
                Some(delay) => Decision::Retry { delay, error },
                None => Decision::GiveUp(ItemError::RetryExhausted {
                    attempts,
                    source: error,
                }),
            },
            RetryPlan::Options(options) => {
                if !options.is_retryable(&error) {
                    Decision::GiveUp(ItemError::Processing(error))
                } else if retries >= options.max_retries {
                    Decision::GiveUp(ItemError::RetryExhausted {
                        attempts,
                        source: error,
                    })
                } else {
                    Decision::Retry {
                        delay: options.delay_for_attempt(attempts),
                        error,
                    }
                }
            }
        }
    }
}

enum Decision {
    Retry { delay: Duration, error: anyhow::Error },
    GiveUp(ItemError),
}

/// Outcome of running one item through the retry loop.
#[derive(Debug)]
pub(crate) struct Attempted {
    pub(crate) outcome: Result<(), ItemError>,
    pub(crate) retries: u32,
}

/// Process `item` until it succeeds, the plan gives up, or `cancel` fires
/// during a backoff.
pub(crate) async fn run_with_retry<T, P>(
    processor: &P,
    cancel: &CancellationToken,
    item: &T,
    index: usize,
    plan: &RetryPlan,
) -> Attempted
where
    T: WorkItem,
    P: BatchProcessor<T> + ?Sized,
{
    let mut retries = 0u32;

    loop {
        let error = match processor.process(cancel, item).await {
            Ok(()) => {
                if let Err(err) = processor.on_success(cancel, item).await {
                    warn!(index, error = %err, "on_success hook failed");
                }
                return Attempted {
                    outcome: Ok(()),
                    retries,
                };
            }
            Err(err) => processor.on_error(cancel, item, err).await,
        };

        match plan.decide(error, retries) {
            Decision::GiveUp(error) => {
                warn!(index, retries, error = %error, "item failed");
                return Attempted {
                    outcome: Err(error),
                    retries,
                };
            }
            Decision::Retry { delay, error } => {
                debug!(
                    index,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying item"
                );

                let slept = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                };
                if !slept {
                    debug!(index, retries, "backoff interrupted by cancellation");
                    return Attempted {
                        outcome: Err(ItemError::Processing(error)),
                        retries,
                    };
                }
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Fails the first `failures` attempts, then succeeds.
    struct Flaky {
        failures: u32,
        attempts: AtomicU32,
        successes: AtomicU32,
        seen_errors: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                successes: AtomicU32::new(0),
                seen_errors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchProcessor<u32> for Flaky {
        async fn process(&self, _cancel: &CancellationToken, _item: &u32) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                anyhow::bail!("connection reset on attempt {attempt}");
            }
            Ok(())
        }

        async fn on_error(
            &self,
            _cancel: &CancellationToken,
            _item: &u32,
            error: anyhow::Error,
        ) -> anyhow::Error {
            self.seen_errors.lock().unwrap().push(error.to_string());
            error.context("wrapped")
        }

        async fn on_success(&self, _cancel: &CancellationToken, _item: &u32) -> anyhow::Result<()> {
            self.successes.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("audit log unavailable")
        }
    }

    #[test]
    fn default_policy_is_linear_and_capped() {
        let policy = default_retry_policy(3, Duration::from_secs(1));
        let err = anyhow::anyhow!("x");

        assert_eq!(policy(&err, 0), Some(Duration::from_secs(1)));
        assert_eq!(policy(&err, 2), Some(Duration::from_secs(3)));
        assert_eq!(policy(&err, 3), None);
    }

    #[test]
    fn transient_errors_are_recognised_through_context() {
        let err = anyhow::anyhow!("ERROR: deadlock detected (SQLSTATE 40P01)");
        assert!(is_transient(&err));

        let wrapped = anyhow::anyhow!("Connection Refused").context("syncing partner 7");
        assert!(is_transient(&wrapped));

        assert!(is_transient(&anyhow::anyhow!("context deadline exceeded")));
        assert!(!is_transient(&anyhow::anyhow!("duplicate key value")));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries_and_tolerates_failing_success_hook() {
        let processor = Flaky::new(2);
        let plan = RetryPlan::Policy(default_retry_policy(3, Duration::from_secs(1)));

        let attempted =
            run_with_retry(&processor, &CancellationToken::new(), &7, 0, &plan).await;

        assert!(attempted.outcome.is_ok());
        assert_eq!(attempted.retries, 2);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(processor.successes.load(Ordering::SeqCst), 1);
        assert_eq!(processor.seen_errors.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn options_exhaust_after_max_retries() {
        let processor = Flaky::new(u32::MAX);
        let plan = RetryPlan::Options(RetryOptions::new(2, Duration::from_millis(1)));

        let attempted =
            run_with_retry(&processor, &CancellationToken::new(), &7, 0, &plan).await;

        match attempted.outcome {
            Err(ItemError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().starts_with("wrapped"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(attempted.retries, 2);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(processor.successes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_errors_are_not_retried() {
        let processor = Flaky::new(u32::MAX);
        let plan = RetryPlan::Options(
            RetryOptions::new(5, Duration::from_millis(1)).retry_if(|_| false),
        );

        let attempted =
            run_with_retry(&processor, &CancellationToken::new(), &7, 0, &plan).await;

        assert!(matches!(attempted.outcome, Err(ItemError::Processing(_))));
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let processor = Flaky::new(u32::MAX);
        let plan = RetryPlan::Options(RetryOptions::new(5, Duration::from_secs(30)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let attempted = run_with_retry(&processor, &cancel, &7, 0, &plan).await;

        assert!(matches!(attempted.outcome, Err(ItemError::Processing(_))));
        assert_eq!(attempted.retries, 0);
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 1);
    }
}
