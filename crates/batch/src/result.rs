//! Aggregated outcome of a batch run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hrops_core::{Metadata, merge_metadata};

use crate::error::ItemError;
use crate::options::ProgressCallback;

/// One failed or skipped item.
#[derive(Debug)]
pub struct BatchError<T> {
    /// Position of the item in the input (or arrival order for streams).
    pub index: usize,
    pub item: T,
    pub error: ItemError,
    pub timestamp: DateTime<Utc>,
    /// Retries consumed before the item gave up (0 for skipped items).
    pub retries: u32,
}

/// Counters, timing and errors for one run.
///
/// Once a run has finished, `processed_items == successful_items +
/// failed_items` and `processed_items + skipped_items <= total_items`.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    /// Failures in the order they were observed.
    pub errors: Vec<BatchError<T>>,
    pub metadata: Metadata,
}

/// Terminal outcome of one item, as reported to the aggregator.
#[derive(Debug)]
pub(crate) enum Completion<T> {
    Succeeded,
    Failed {
        index: usize,
        item: T,
        error: ItemError,
        retries: u32,
    },
    Skipped {
        index: usize,
        item: T,
        error: ItemError,
    },
}

impl<T> BatchResult<T> {
    /// Empty result for a run over `total` items, stamped with the current time.
    pub fn new(total: usize) -> Self {
        Self {
            total_items: total,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            started_at: Utc::now(),
            ended_at: None,
            duration: Duration::ZERO,
            errors: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub(crate) fn record(&mut self, completion: Completion<T>) {
        match completion {
            Completion::Succeeded => {
                self.processed_items += 1;
                self.successful_items += 1;
            }
            Completion::Failed {
                index,
                item,
                error,
                retries,
            } => {
                self.processed_items += 1;
                self.failed_items += 1;
                self.push_error(index, item, error, retries);
            }
            Completion::Skipped { index, item, error } => {
                self.skipped_items += 1;
                self.push_error(index, item, error, 0);
            }
        }
    }

    fn push_error(&mut self, index: usize, item: T, error: ItemError, retries: u32) {
        self.errors.push(BatchError {
            index,
            item,
            error,
            timestamp: Utc::now(),
            retries,
        });
    }

    /// Merge the counters and errors of a sub-run (a chunk) into this one.
    /// `total_items` is left alone; the caller owns it.
    pub(crate) fn absorb(&mut self, other: BatchResult<T>) {
        self.processed_items += other.processed_items;
        self.successful_items += other.successful_items;
        self.failed_items += other.failed_items;
        self.skipped_items += other.skipped_items;
        self.errors.extend(other.errors);
        merge_metadata(&mut self.metadata, &other.metadata);
    }

    pub(crate) fn finish(mut self) -> Self {
        let ended_at = Utc::now();
        self.duration = (ended_at - self.started_at).to_std().unwrap_or_default();
        self.ended_at = Some(ended_at);
        self
    }

    /// Share of the input that has an outcome, in percent.
    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.processed_items + self.skipped_items) as f64 / self.total_items as f64 * 100.0
    }

    pub(crate) fn report_progress(&self, progress: Option<&ProgressCallback>) {
        if let Some(progress) = progress {
            progress(self.processed_items, self.total_items, self.percentage());
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed_items > 0
    }

    pub fn summary(&self) -> BatchSummary {
        let duration_secs = self.duration.as_secs_f64();
        let throughput_per_sec = if duration_secs > 0.0 {
            self.processed_items as f64 / duration_secs
        } else {
            0.0
        };
        let success_rate_percent = if self.processed_items > 0 {
            self.successful_items as f64 / self.processed_items as f64 * 100.0
        } else {
            0.0
        };

        BatchSummary {
            total_items: self.total_items,
            processed_items: self.processed_items,
            successful_items: self.successful_items,
            failed_items: self.failed_items,
            skipped_items: self.skipped_items,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration.as_millis() as u64,
            throughput_per_sec,
            success_rate_percent,
            metadata: self.metadata.clone(),
        }
    }
}

/// Serializable snapshot of a [`BatchResult`], without the items themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub throughput_per_sec: f64,
    pub success_rate_percent: f64,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(index: usize, item: &'static str) -> Completion<&'static str> {
        Completion::Failed {
            index,
            item,
            error: ItemError::Processing(anyhow::anyhow!("boom")),
            retries: 2,
        }
    }

    #[test]
    fn record_keeps_counts_consistent() {
        let mut result = BatchResult::new(4);
        result.record(Completion::Succeeded);
        result.record(failure(1, "b"));
        result.record(Completion::Skipped {
            index: 2,
            item: "c",
            error: ItemError::Validation(anyhow::anyhow!("empty")),
        });

        assert_eq!(result.processed_items, 2);
        assert_eq!(result.successful_items, 1);
        assert_eq!(result.failed_items, 1);
        assert_eq!(result.skipped_items, 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].index, 1);
        assert_eq!(result.errors[0].retries, 2);
        assert_eq!(result.errors[1].retries, 0);
        assert!(result.errors[1].error.is_validation());
        assert_eq!(result.percentage(), 75.0);
    }

    #[test]
    fn empty_run_is_complete() {
        let result = BatchResult::<u8>::new(0).finish();
        assert_eq!(result.percentage(), 100.0);
        assert!(result.ended_at.is_some());
        assert!(!result.has_failures());
    }

    #[test]
    fn absorb_merges_counts_and_errors() {
        let mut total = BatchResult::new(6);
        total.record(Completion::Succeeded);

        let mut chunk = BatchResult::new(3);
        chunk.record(Completion::Succeeded);
        chunk.record(failure(4, "e"));
        chunk.metadata.insert("chunk".into(), serde_json::json!(2));

        total.absorb(chunk);

        assert_eq!(total.total_items, 6);
        assert_eq!(total.processed_items, 3);
        assert_eq!(total.failed_items, 1);
        assert_eq!(total.errors[0].item, "e");
        assert_eq!(total.metadata["chunk"], serde_json::json!(2));
    }

    #[test]
    fn summary_computes_rates() {
        let mut result = BatchResult::new(4);
        for _ in 0..3 {
            result.record(Completion::Succeeded);
        }
        result.record(failure(3, "d"));
        result.duration = Duration::from_secs(2);

        let summary = result.summary();
        assert_eq!(summary.duration_ms, 2000);
        assert_eq!(summary.throughput_per_sec, 2.0);
        assert_eq!(summary.success_rate_percent, 75.0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["failed_items"], 1);
    }

    #[test]
    fn progress_reports_processed_and_percentage() {
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback =
            Arc::new(move |done, total, pct| sink.lock().unwrap().push((done, total, pct)));

        let mut result = BatchResult::<u8>::new(2);
        result.record(Completion::Succeeded);
        result.report_progress(Some(&callback));
        result.report_progress(None);

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2, 50.0)]);
    }
}
