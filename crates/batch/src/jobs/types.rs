//! Batch job records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hrops_core::{BatchJobId, Metadata, merge_metadata};

use crate::result::BatchSummary;

/// Lifecycle status of a tracked batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    /// Registered, no progress reported yet
    Pending,
    /// Progress has been reported
    Running,
    /// Finished without failed items
    Completed,
    /// Finished with at least one failed item
    Failed,
    /// Abandoned before completion
    Cancelled,
}

impl BatchJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchJobStatus::Completed | BatchJobStatus::Failed | BatchJobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::Pending => "pending",
            BatchJobStatus::Running => "running",
            BatchJobStatus::Completed => "completed",
            BatchJobStatus::Failed => "failed",
            BatchJobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: BatchJobId,
    pub name: String,
    pub status: BatchJobStatus,
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, total_items: usize) -> Self {
        let now = Utc::now();
        Self {
            id: BatchJobId::new(),
            name: name.into(),
            status: BatchJobStatus::Pending,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            started_at: now,
            completed_at: None,
            last_updated_at: now,
            metadata: Metadata::new(),
        }
    }

    /// Record progress; the job is running from here on.
    pub fn mark_progress(&mut self, processed_items: usize, failed_items: usize) {
        self.status = BatchJobStatus::Running;
        self.processed_items = processed_items;
        self.failed_items = failed_items;
        self.successful_items = processed_items.saturating_sub(failed_items);
        self.last_updated_at = Utc::now();
    }

    /// Finalize from a run summary.
    pub fn mark_finished(&mut self, summary: &BatchSummary) {
        let now = Utc::now();
        self.status = if summary.failed_items > 0 {
            BatchJobStatus::Failed
        } else {
            BatchJobStatus::Completed
        };
        self.processed_items = summary.processed_items;
        self.successful_items = summary.successful_items;
        self.failed_items = summary.failed_items;
        self.completed_at = Some(now);
        self.last_updated_at = now;

        merge_metadata(&mut self.metadata, &summary.metadata);
        self.metadata
            .insert("skipped_items".into(), summary.skipped_items.into());
        self.metadata
            .insert("duration_ms".into(), summary.duration_ms.into());
        self.metadata.insert(
            "success_rate_percent".into(),
            summary.success_rate_percent.into(),
        );
    }

    pub fn mark_cancelled(&mut self) {
        let now = Utc::now();
        self.status = BatchJobStatus::Cancelled;
        self.completed_at = Some(now);
        self.last_updated_at = now;
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchJobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
