//! Cancellation scope shared by everything a single run starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::RunError;

/// Child of the caller's token, optionally cancelled by a deadline timer.
///
/// The run itself can also [`stop`](Self::stop) the scope (stop-on-error,
/// worker panic); that does not count as an interruption.
#[derive(Debug)]
pub(crate) struct RunScope {
    parent: CancellationToken,
    token: CancellationToken,
    timeout: Option<Duration>,
    timed_out: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl RunScope {
    pub(crate) fn new(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = parent.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));

        let timer = timeout.map(|limit| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        Self {
            parent: parent.clone(),
            token,
            timeout,
            timed_out,
            timer,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub(crate) fn stop(&self) {
        self.token.cancel();
    }

    /// The run error when the caller or the deadline cancelled the scope,
    /// `None` when it is still live or was only [`stop`](Self::stop)ped.
    pub(crate) fn interruption(&self) -> Option<RunError> {
        if self.timed_out.load(Ordering::SeqCst) {
            return Some(RunError::TimedOut(self.timeout.unwrap_or_default()));
        }
        self.parent.is_cancelled().then_some(RunError::Cancelled)
    }

    /// Like [`interruption`](Self::interruption), for callers that already
    /// observed the scope as done.
    pub(crate) fn reason(&self) -> RunError {
        self.interruption().unwrap_or(RunError::Cancelled)
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.token.cancel();
    }
}
