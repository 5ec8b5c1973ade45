//! Counts and timings for the read API.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use jobhouse_core::{JobStatus, QueueError, QueueResult};

use super::Manager;
use crate::store::{JobFilter, JobTimings, QueueStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub total: u64,
    /// Heartbeat within the stale threshold
    pub active: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub total: u64,
    /// PENDING and already due
    pub pending: u64,
    /// PENDING with `available_at` in the future
    pub scheduled: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
}

/// Whole-system snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub workers: WorkerCounts,
    pub jobs: JobCounts,
    /// `available_at` of the longest-waiting due job
    pub oldest_available_at: Option<DateTime<Utc>>,
    /// Latency and duration over the last 24h
    pub last_24h: JobTimings,
    pub throughput_1h: u64,
    pub generated_at: DateTime<Utc>,
}

/// Per-queue snapshot over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub queue: String,
    pub jobs: JobCounts,
    pub window_secs: i64,
    pub timings: JobTimings,
}

impl<S: QueueStore + ?Sized> Manager<S> {
    pub async fn worker_counts(&self) -> QueueResult<WorkerCounts> {
        let now = self.now();
        let stale_after = self.config.stale_after();
        let workers = self.store.list_workers().await?;
        let stale = workers
            .iter()
            .filter(|w| w.is_stale(now, stale_after))
            .count() as u64;
        let total = workers.len() as u64;

        Ok(WorkerCounts {
            total,
            active: total - stale,
            stale,
        })
    }

    pub async fn job_counts(&self, queue: Option<&str>) -> QueueResult<JobCounts> {
        let now = self.now();
        let count = |filter: JobFilter| {
            let filter = filter.in_queue(queue);
            async move { self.store.count_jobs(&filter).await }
        };

        Ok(JobCounts {
            total: count(JobFilter::default()).await?,
            pending: count(JobFilter {
                available_by: Some(now),
                ..JobFilter::status(JobStatus::Pending)
            })
            .await?,
            scheduled: count(JobFilter {
                available_after: Some(now),
                ..JobFilter::status(JobStatus::Pending)
            })
            .await?,
            running: count(JobFilter::status(JobStatus::Running)).await?,
            complete: count(JobFilter::status(JobStatus::Complete)).await?,
            failed: count(JobFilter::status(JobStatus::Failed)).await?,
        })
    }

    /// Latency, duration and throughput over the trailing `window`.
    pub async fn timings(&self, queue: Option<&str>, window: Duration) -> QueueResult<JobTimings> {
        let since = self
            .now()
            .checked_sub_signed(window)
            .ok_or_else(|| QueueError::validation(format!("timing window {window} is out of range")))?;
        Ok(self.store.job_timings(queue, since).await?)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let now = self.now();
        Ok(QueueStats {
            workers: self.worker_counts().await?,
            jobs: self.job_counts(None).await?,
            oldest_available_at: self.store.oldest_available_at(None, now).await?,
            last_24h: self.timings(None, Duration::hours(24)).await?,
            throughput_1h: self.timings(None, Duration::hours(1)).await?.throughput,
            generated_at: now,
        })
    }

    pub async fn queue_stats(&self, queue: &str, window: Duration) -> QueueResult<QueueSummary> {
        Ok(QueueSummary {
            queue: queue.to_string(),
            jobs: self.job_counts(Some(queue)).await?,
            window_secs: window.num_seconds(),
            timings: self.timings(Some(queue), window).await?,
        })
    }

    /// Registered queues plus any queue that still has rows.
    pub async fn known_queues(&self) -> QueueResult<Vec<String>> {
        let mut queues: BTreeSet<String> = self.resolver.ids().map(str::to_string).collect();
        queues.extend(self.store.job_queues().await?);
        Ok(queues.into_iter().collect())
    }
}
