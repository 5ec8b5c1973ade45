//! Persistence collaborator for jobs and workers.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryQueueStore`]: single-process, mutex-guarded; used by tests and
//!   local development.
//! - [`PostgresQueueStore`]: the production backend. Leasing relies on
//!   `SELECT ... FOR UPDATE SKIP LOCKED` inside a transaction.
//!
//! Deleting a worker must clear `worker_id` on the jobs it held (the schema's
//! `ON DELETE SET NULL`); that is what turns an evicted worker's RUNNING jobs
//! into stuck jobs for the maintenance pass.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryQueueStore;
pub use postgres::{PostgresQueueStore, SCHEMA};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobhouse_core::{
    ErrorRecord, Job, JobId, JobStatus, NewJob, NewWorker, QueueError, Worker, WorkerId,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => QueueError::NotFound(msg),
            StoreError::Serialization(msg) => QueueError::Serialization(msg),
            other => QueueError::Persistence(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Partial update of a job row. `None` leaves a column untouched; for
/// nullable columns `Some(None)` writes NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub worker_id: Option<Option<WorkerId>>,
    pub available_at: Option<DateTime<Utc>>,
    pub started: Option<Option<DateTime<Utc>>>,
    pub finished: Option<Option<DateTime<Utc>>>,
    pub errors: Option<Vec<ErrorRecord>>,
    pub attempts: Option<u32>,
}

impl JobPatch {
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(worker_id) = self.worker_id {
            job.worker_id = worker_id;
        }
        if let Some(available_at) = self.available_at {
            job.available_at = available_at;
        }
        if let Some(started) = self.started {
            job.started = started;
        }
        if let Some(finished) = self.finished {
            job.finished = finished;
        }
        if let Some(errors) = &self.errors {
            job.errors = errors.clone();
        }
        if let Some(attempts) = self.attempts {
            job.attempts = attempts;
        }
        job.modified = now;
    }
}

/// Row filter for job reads. Every field left at its default matches all rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub queue: Option<String>,
    /// `available_at <= t`
    pub available_by: Option<DateTime<Utc>>,
    /// `available_at > t`
    pub available_after: Option<DateTime<Utc>>,
    /// Highest ids first instead of FIFO order.
    pub newest_first: bool,
    pub limit: Option<u32>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn in_queue(mut self, queue: Option<&str>) -> Self {
        self.queue = queue.map(str::to_string);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.queue.as_deref().is_none_or(|q| job.queue == q)
            && self.available_by.is_none_or(|t| job.available_at <= t)
            && self.available_after.is_none_or(|t| job.available_at > t)
    }
}

/// Aggregates over a time window, optionally restricted to one queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTimings {
    /// Mean `started - available_at` over jobs started in the window, seconds
    pub avg_latency_secs: Option<f64>,
    /// Mean `finished - started` over COMPLETE jobs finished in the window, seconds
    pub avg_duration_secs: Option<f64>,
    /// COMPLETE + FAILED jobs finished in the window
    pub throughput: u64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> StoreResult<Job>;

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Atomically select the lowest-id row with `status = PENDING`,
    /// `worker_id IS NULL`, `queue IN queues` and `available_at <= now`, and
    /// move it to RUNNING for `worker`.
    ///
    /// Implementations guarantee no row is ever handed to two concurrent callers.
    async fn lease_next(
        &self,
        queues: &[String],
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    /// Apply `patch` to one row and return it. `NotFound` when the row is gone.
    async fn update_job(&self, id: JobId, patch: &JobPatch, now: DateTime<Utc>)
    -> StoreResult<Job>;

    /// Apply `patch` only while the row is in `expected`, as one atomic step.
    /// `None` when the row is gone or has moved to another status.
    async fn update_job_if(
        &self,
        id: JobId,
        expected: JobStatus,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    async fn find_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    async fn count_jobs(&self, filter: &JobFilter) -> StoreResult<u64>;

    /// Reset every RUNNING row with no worker, a start time and no finish time
    /// to PENDING with `started = NULL`. Returns the reset rows.
    async fn reset_stuck_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>>;

    /// Delete rows in `status` whose `finished` is before `before`. Returns them.
    async fn delete_finished_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>>;

    /// Earliest `available_at` among PENDING rows already due at `now`.
    async fn oldest_available_at(
        &self,
        queue: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn job_timings(
        &self,
        queue: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<JobTimings>;

    /// Distinct queue identifiers present in the table.
    async fn job_queues(&self) -> StoreResult<Vec<String>>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// `Conflict` when the token is taken.
    async fn insert_worker(&self, worker: NewWorker, now: DateTime<Utc>) -> StoreResult<Worker>;

    async fn get_worker(&self, id: WorkerId) -> StoreResult<Option<Worker>>;

    /// Set `heartbeat = at`. `NotFound` when the row was already evicted.
    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<Worker>;

    /// Returns whether a row was deleted.
    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool>;

    async fn list_workers(&self) -> StoreResult<Vec<Worker>>;

    /// Delete workers whose heartbeat is strictly before `before`. Returns them.
    async fn delete_stale_workers(&self, before: DateTime<Utc>) -> StoreResult<Vec<Worker>>;
}

/// Everything the manager needs from storage.
pub trait QueueStore: JobStore + WorkerStore {}

impl<T: JobStore + WorkerStore> QueueStore for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job() -> Job {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Job {
            id: JobId::new(1),
            queue: "q".into(),
            task: "t".into(),
            data: serde_json::Value::Null,
            status: JobStatus::Running,
            worker_id: Some(WorkerId::new(2)),
            available_at: t,
            started: Some(t),
            finished: None,
            errors: Vec::new(),
            attempts: 0,
            created: t,
            modified: t,
        }
    }

    #[test]
    fn patch_distinguishes_untouched_from_null() {
        let mut j = job();
        let now = j.created + chrono::Duration::seconds(5);
        JobPatch {
            status: Some(JobStatus::Complete),
            worker_id: Some(None),
            finished: Some(Some(now)),
            ..Default::default()
        }
        .apply(&mut j, now);

        assert_eq!(j.status, JobStatus::Complete);
        assert_eq!(j.worker_id, None);
        assert!(j.started.is_some());
        assert_eq!(j.finished, Some(now));
        assert_eq!(j.modified, now);
    }

    #[test]
    fn filter_matches_on_every_set_field() {
        let j = job();
        assert!(JobFilter::default().matches(&j));
        assert!(JobFilter::status(JobStatus::Running).matches(&j));
        assert!(!JobFilter::status(JobStatus::Pending).matches(&j));
        assert!(!JobFilter::default().in_queue(Some("other")).matches(&j));

        let by = JobFilter {
            available_by: Some(j.available_at),
            ..Default::default()
        };
        assert!(by.matches(&j));
        let after = JobFilter {
            available_after: Some(j.available_at),
            ..Default::default()
        };
        assert!(!after.matches(&j));
    }

    #[test]
    fn store_errors_map_into_queue_errors() {
        assert!(matches!(
            QueueError::from(StoreError::NotFound("job 1".into())),
            QueueError::NotFound(_)
        ));
        assert!(QueueError::from(StoreError::Storage("io".into())).is_persistence());
        assert!(QueueError::from(StoreError::Conflict("dup".into())).is_persistence());
    }
}
