//! Batch job registry implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::info;

use hrops_core::BatchJobId;

use super::types::{BatchJob, BatchJobStats, BatchJobStatus};
use crate::result::BatchSummary;

/// Registry of batch job records.
///
/// The store owns the records; every read hands out a clone.
pub trait BatchJobStore: Send + Sync {
    /// Register a new pending job.
    fn create_batch_job(&self, name: &str, total_items: usize) -> Result<BatchJob, JobStoreError>;

    /// Report progress; moves the job to running.
    fn update_batch_job_progress(
        &self,
        id: BatchJobId,
        processed_items: usize,
        failed_items: usize,
    ) -> Result<(), JobStoreError>;

    /// Finalize a job from the summary of its run.
    fn complete_batch_job(
        &self,
        id: BatchJobId,
        summary: &BatchSummary,
    ) -> Result<BatchJob, JobStoreError>;

    fn get_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError>;

    /// Cancel a job that has not finished yet.
    fn cancel_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError>;

    /// Jobs ordered by start time, optionally filtered by status.
    fn list_batch_jobs(
        &self,
        status: Option<BatchJobStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, JobStoreError>;

    fn remove_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError>;

    /// Drop finished jobs completed before `before`. Returns how many went.
    fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError>;

    fn stats(&self) -> Result<BatchJobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("batch job not found: {0}")]
    NotFound(BatchJobId),
    #[error("batch job {id} already {status}")]
    AlreadyFinished {
        id: BatchJobId,
        status: BatchJobStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory registry behind a single read/write lock.
#[derive(Debug, Default)]
pub struct InMemoryBatchJobStore {
    jobs: RwLock<HashMap<BatchJobId, BatchJob>>,
}

impl InMemoryBatchJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<BatchJobId, BatchJob>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("batch job table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<BatchJobId, BatchJob>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("batch job table lock poisoned".to_string()))
    }
}

/// Look up a job that may still change.
fn open_job(
    jobs: &mut HashMap<BatchJobId, BatchJob>,
    id: BatchJobId,
) -> Result<&mut BatchJob, JobStoreError> {
    let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
    if job.status.is_terminal() {
        return Err(JobStoreError::AlreadyFinished {
            id,
            status: job.status,
        });
    }
    Ok(job)
}

impl BatchJobStore for InMemoryBatchJobStore {
    fn create_batch_job(&self, name: &str, total_items: usize) -> Result<BatchJob, JobStoreError> {
        let job = BatchJob::new(name, total_items);
        self.write()?.insert(job.id, job.clone());

        info!(job_id = %job.id, name, total_items, "batch job created");
        Ok(job)
    }

    fn update_batch_job_progress(
        &self,
        id: BatchJobId,
        processed_items: usize,
        failed_items: usize,
    ) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        open_job(&mut jobs, id)?.mark_progress(processed_items, failed_items);
        Ok(())
    }

    fn complete_batch_job(
        &self,
        id: BatchJobId,
        summary: &BatchSummary,
    ) -> Result<BatchJob, JobStoreError> {
        let mut jobs = self.write()?;
        let job = open_job(&mut jobs, id)?;
        job.mark_finished(summary);

        info!(
            job_id = %job.id,
            name = %job.name,
            status = %job.status,
            processed = job.processed_items,
            failed = job.failed_items,
            duration_ms = summary.duration_ms,
            "batch job finished"
        );
        Ok(job.clone())
    }

    fn get_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    fn cancel_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        let mut jobs = self.write()?;
        let job = open_job(&mut jobs, id)?;
        job.mark_cancelled();

        info!(job_id = %job.id, name = %job.name, "batch job cancelled");
        Ok(job.clone())
    }

    fn list_batch_jobs(
        &self,
        status: Option<BatchJobStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.started_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn remove_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        self.write()?.remove(&id).ok_or(JobStoreError::NotFound(id))
    }

    fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.write()?;
        let len_before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < before))
        });
        Ok(len_before - jobs.len())
    }

    fn stats(&self) -> Result<BatchJobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = BatchJobStats::default();

        for job in jobs.values() {
            match job.status {
                BatchJobStatus::Pending => stats.pending += 1,
                BatchJobStatus::Running => stats.running += 1,
                BatchJobStatus::Completed => stats.completed += 1,
                BatchJobStatus::Failed => stats.failed += 1,
                BatchJobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        Ok(stats)
    }
}

impl<S: BatchJobStore + ?Sized> BatchJobStore for Arc<S> {
    fn create_batch_job(&self, name: &str, total_items: usize) -> Result<BatchJob, JobStoreError> {
        (**self).create_batch_job(name, total_items)
    }

    fn update_batch_job_progress(
        &self,
        id: BatchJobId,
        processed_items: usize,
        failed_items: usize,
    ) -> Result<(), JobStoreError> {
        (**self).update_batch_job_progress(id, processed_items, failed_items)
    }

    fn complete_batch_job(
        &self,
        id: BatchJobId,
        summary: &BatchSummary,
    ) -> Result<BatchJob, JobStoreError> {
        (**self).complete_batch_job(id, summary)
    }

    fn get_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        (**self).get_batch_job(id)
    }

    fn cancel_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        (**self).cancel_batch_job(id)
    }

    fn list_batch_jobs(
        &self,
        status: Option<BatchJobStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, JobStoreError> {
        (**self).list_batch_jobs(status, limit)
    }

    fn remove_batch_job(&self, id: BatchJobId) -> Result<BatchJob, JobStoreError> {
        (**self).remove_batch_job(id)
    }

    fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        (**self).purge_finished(before)
    }

    fn stats(&self) -> Result<BatchJobStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use crate::result::BatchResult;

    fn summary(processed: usize, failed: usize) -> BatchSummary {
        let mut result = BatchResult::<u8>::new(processed);
        result.processed_items = processed;
        result.successful_items = processed - failed;
        result.failed_items = failed;
        result.summary()
    }

    #[test]
    fn lifecycle_pending_running_completed() {
        let store = InMemoryBatchJobStore::new();

        let job = store.create_batch_job("monthly_invoice", 10).unwrap();
        assert_eq!(job.status, BatchJobStatus::Pending);

        store.update_batch_job_progress(job.id, 5, 0).unwrap();
        let running = store.get_batch_job(job.id).unwrap();
        assert_eq!(running.status, BatchJobStatus::Running);
        assert_eq!(running.processed_items, 5);

        let done = store.complete_batch_job(job.id, &summary(10, 0)).unwrap();
        assert_eq!(done.status, BatchJobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(store.get_batch_job(job.id).unwrap(), done);
    }

    #[test]
    fn completion_with_failures_marks_failed() {
        let store = InMemoryBatchJobStore::new();
        let job = store.create_batch_job("partner_sync", 3).unwrap();

        let done = store.complete_batch_job(job.id, &summary(3, 1)).unwrap();

        assert_eq!(done.status, BatchJobStatus::Failed);
        assert_eq!(done.successful_items, 2);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = InMemoryBatchJobStore::new();
        let id = BatchJobId::new();

        assert_eq!(store.get_batch_job(id), Err(JobStoreError::NotFound(id)));
        assert_eq!(
            store.update_batch_job_progress(id, 1, 0),
            Err(JobStoreError::NotFound(id))
        );
        assert_eq!(
            store.complete_batch_job(id, &summary(0, 0)).unwrap_err(),
            JobStoreError::NotFound(id)
        );
        assert_eq!(
            JobStoreError::NotFound(id).to_string(),
            format!("batch job not found: {id}")
        );
    }

    #[test]
    fn finished_jobs_are_frozen() {
        let store = InMemoryBatchJobStore::new();
        let job = store.create_batch_job("data_cleanup", 1).unwrap();
        store.cancel_batch_job(job.id).unwrap();

        let err = store.complete_batch_job(job.id, &summary(1, 0)).unwrap_err();
        assert_eq!(
            err,
            JobStoreError::AlreadyFinished {
                id: job.id,
                status: BatchJobStatus::Cancelled
            }
        );
        assert!(store.update_batch_job_progress(job.id, 1, 0).is_err());
        assert!(store.cancel_batch_job(job.id).is_err());
    }

    #[test]
    fn list_filters_and_limits() {
        let store = InMemoryBatchJobStore::new();
        let ids: Vec<_> = (0..4)
            .map(|i| store.create_batch_job(&format!("job-{i}"), i).unwrap().id)
            .collect();
        store.cancel_batch_job(ids[1]).unwrap();

        let pending = store
            .list_batch_jobs(Some(BatchJobStatus::Pending), 10)
            .unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].id, ids[0]);

        let first_two = store.list_batch_jobs(None, 2).unwrap();
        assert_eq!(
            first_two.iter().map(|j| j.id).collect::<Vec<_>>(),
            ids[..2].to_vec()
        );
    }

    #[test]
    fn purge_and_remove_reclaim_storage() {
        let store = InMemoryBatchJobStore::new();
        let finished = store.create_batch_job("old", 1).unwrap();
        let active = store.create_batch_job("active", 1).unwrap();
        let extra = store.create_batch_job("extra", 1).unwrap();
        store.complete_batch_job(finished.id, &summary(1, 0)).unwrap();

        let purged = store.purge_finished(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_batch_job(finished.id).is_err());
        assert!(store.get_batch_job(active.id).is_ok());

        let removed = store.remove_batch_job(extra.id).unwrap();
        assert_eq!(removed.name, "extra");
        assert_eq!(
            store.remove_batch_job(extra.id),
            Err(JobStoreError::NotFound(extra.id))
        );
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryBatchJobStore::arc();
        for i in 0..5 {
            store.create_batch_job(&format!("job-{i}"), 1).unwrap();
        }
        let jobs = store.list_batch_jobs(None, 5).unwrap();
        store.update_batch_job_progress(jobs[0].id, 0, 0).unwrap();
        store.complete_batch_job(jobs[1].id, &summary(1, 1)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            BatchJobStats {
                pending: 3,
                running: 1,
                completed: 0,
                failed: 1,
                cancelled: 0,
            }
        );
    }

    #[test]
    fn concurrent_progress_updates() {
        let store = InMemoryBatchJobStore::arc();
        let job = store.create_batch_job("concurrent", 800).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 1..=100 {
                        store.update_batch_job_progress(job.id, t * 100 + i, 0).unwrap();
                        store.get_batch_job(job.id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let job = store.get_batch_job(job.id).unwrap();
        assert_eq!(job.status, BatchJobStatus::Running);
        assert!(job.processed_items >= 100 && job.processed_items <= 800);
    }
}
