//! Maintenance routines: stale-worker eviction, stuck-job recovery, rotation.

use chrono::Duration;
use serde::Serialize;
use tracing::info;

use jobhouse_core::{Job, JobStatus, QueueError, QueueResult, Worker, dedup_by_id};

use super::Manager;
use crate::store::QueueStore;

/// Outcome of one `clean` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub workers: Vec<Worker>,
    pub stuck: Vec<Job>,
    pub rotated: Vec<Job>,
}

impl<S: QueueStore + ?Sized> Manager<S> {
    /// Delete workers whose heartbeat is older than the stale threshold.
    ///
    /// Their RUNNING jobs lose `worker_id` and are picked up by
    /// [`Manager::reset_stuck_jobs`] on the next pass.
    pub async fn delete_stale_workers(&self) -> QueueResult<Vec<Worker>> {
        let boundary = self
            .now()
            .checked_sub_signed(self.config.stale_after())
            .ok_or_else(|| QueueError::validation("worker stale threshold is out of range"))?;
        let workers = self.store.delete_stale_workers(boundary).await?;
        if !workers.is_empty() {
            info!(count = workers.len(), %boundary, "stale workers deleted");
        }
        Ok(workers)
    }

    /// RUNNING jobs without a worker go back to PENDING with `started`
    /// cleared. `attempts`, `errors` and `available_at` are left alone.
    pub async fn reset_stuck_jobs(&self) -> QueueResult<Vec<Job>> {
        let jobs = self.store.reset_stuck_jobs(self.now()).await?;
        if !jobs.is_empty() {
            info!(count = jobs.len(), "stuck jobs reset");
        }
        Ok(jobs)
    }

    /// Delete COMPLETE and FAILED jobs older than their retention window,
    /// measured from `finished`. A window of 0 days skips that status.
    pub async fn rotate_old_jobs(&self) -> QueueResult<Vec<Job>> {
        let now = self.now();
        let windows = [
            (JobStatus::Complete, self.config.job_rotate_complete_days),
            (JobStatus::Failed, self.config.job_rotate_failed_days),
        ];

        let mut deleted = Vec::new();
        for (status, days) in windows {
            if days == 0 {
                continue;
            }
            let before = Duration::try_days(i64::from(days))
                .and_then(|window| now.checked_sub_signed(window))
                .ok_or_else(|| {
                    QueueError::validation(format!("{status} retention of {days} days is out of range"))
                })?;
            let jobs = self.store.delete_finished_jobs(status, before).await?;
            if !jobs.is_empty() {
                info!(count = jobs.len(), status = %status, days, "old jobs rotated");
            }
            deleted.extend(jobs);
        }

        Ok(dedup_by_id(deleted))
    }

    /// Eviction, then recovery, then rotation.
    pub async fn clean(&self) -> QueueResult<CleanReport> {
        Ok(CleanReport {
            workers: self.delete_stale_workers().await?,
            stuck: self.reset_stuck_jobs().await?,
            rotated: self.rotate_old_jobs().await?,
        })
    }
}
