//! The queue manager: job and worker lifecycle.
//!
//! ## Design
//!
//! - The manager is the only writer of lifecycle fields on jobs and workers
//! - Leasing is delegated to [`JobStore::lease_next`], which owns the locking
//! - Time comes from an injected [`Clock`], jitter from a seedable RNG
//! - Queue aliases live in a per-manager [`QueueResolver`]
//!
//! ## Components
//!
//! - `lease`: `get_next_job`
//! - `maintenance`: stale-worker eviction, stuck-job recovery, rotation
//! - `stats`: counts and timings for the read API

mod lease;
mod maintenance;
mod stats;

pub use maintenance::CleanReport;
pub use stats::{JobCounts, QueueStats, QueueSummary, WorkerCounts};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use jobhouse_core::{
    Clock, ErrorRecord, Job, JobId, JobStatus, NewJob, NewWorker, Queue, QueueError, QueueRef,
    QueueResolver, QueueResult, SystemClock, TaskError, TaskRegistry, Worker,
};

use crate::config::QueueConfig;
use crate::store::{JobFilter, JobPatch, QueueStore};

/// What happened to a job whose task failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Rescheduled; `attempt` is the retry just applied (1-indexed).
    Retried {
        job: Job,
        attempt: u32,
        max_retries: u32,
    },
    /// Retries exhausted; the job is FAILED.
    Failed { job: Job },
}

impl FailureOutcome {
    pub fn job(&self) -> &Job {
        match self {
            FailureOutcome::Retried { job, .. } | FailureOutcome::Failed { job } => job,
        }
    }
}

/// Queue manager over a storage backend.
pub struct Manager<S: QueueStore + ?Sized = dyn QueueStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    resolver: QueueResolver,
    tasks: TaskRegistry,
    config: QueueConfig,
    rng: Mutex<StdRng>,
}

impl<S: QueueStore + ?Sized> Manager<S> {
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            resolver: QueueResolver::new(),
            tasks: TaskRegistry::with_builtins(),
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deterministic jitter and worker tokens.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_resolver(mut self, resolver: QueueResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskRegistry {
        &mut self.tasks
    }

    pub fn resolver(&self) -> &QueueResolver {
        &self.resolver
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Alias `alias` (case-insensitive) to a registered queue identifier.
    pub fn add_alias(&mut self, alias: &str, queue: impl Into<String>) -> &mut Self {
        self.resolver.add_alias(alias, queue);
        self
    }

    pub fn resolve_queue(&self, queue: impl Into<QueueRef>) -> QueueResult<Arc<dyn Queue>> {
        self.resolver.resolve(queue)
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    // ---- workers ----------------------------------------------------------

    /// Insert a worker row serving `queues`, identified by `host:pid:random`.
    pub async fn register_worker(&self, queues: &[QueueRef]) -> QueueResult<Worker> {
        let ids = queues
            .iter()
            .map(|q| self.resolver.resolve_id(q.clone()))
            .collect::<QueueResult<Vec<_>>>()?;

        let suffix: u32 = self.with_rng(|rng| rng.r#gen());
        let token = format!(
            "{}:{}:{:08x}",
            truncate(&hostname(), 10),
            truncate(&std::process::id().to_string(), 10),
            suffix
        );

        let now = self.now();
        let worker = self
            .store
            .insert_worker(
                NewWorker {
                    token,
                    queues: ids,
                    heartbeat: now,
                },
                now,
            )
            .await?;

        info!(
            worker_id = %worker.id,
            token = %worker.token,
            queues = ?worker.queues,
            "worker registered"
        );
        Ok(worker)
    }

    /// Refresh the heartbeat unless the last one is younger than the
    /// configured debounce window. Returns the stored row either way.
    pub async fn touch_worker(&self, worker: &Worker) -> QueueResult<Worker> {
        self.touch_worker_with(worker, self.config.heartbeat_debounce())
            .await
    }

    pub async fn touch_worker_with(
        &self,
        worker: &Worker,
        debounce: chrono::Duration,
    ) -> QueueResult<Worker> {
        let now = self.now();
        if now - worker.heartbeat >= debounce {
            return Ok(self.store.touch_worker(worker.id, now).await?);
        }
        self.store
            .get_worker(worker.id)
            .await?
            .ok_or_else(|| QueueError::not_found(format!("worker {}", worker.id)))
    }

    /// Delete the worker row. Jobs it still references lose their owner.
    pub async fn unregister_worker(&self, worker: &Worker) -> QueueResult<()> {
        let removed = self.store.delete_worker(worker.id).await?;
        debug!(worker_id = %worker.id, removed, "worker unregistered");
        Ok(())
    }

    pub async fn list_workers(&self) -> QueueResult<Vec<Worker>> {
        Ok(self.store.list_workers().await?)
    }

    // ---- jobs -------------------------------------------------------------

    /// Enqueue `task` with `data`. `queue` defaults to `default`,
    /// `available_at` to now.
    pub async fn push<T: Serialize + Sync + ?Sized>(
        &self,
        task: &str,
        data: &T,
        queue: Option<QueueRef>,
        available_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Job> {
        let queue = self
            .resolver
            .resolve_id(queue.unwrap_or_else(|| QueueRef::from("default")))?;
        let data = serde_json::to_value(data)?;
        let now = self.now();

        let job = self
            .store
            .insert_job(
                NewJob {
                    queue,
                    task: task.to_string(),
                    data,
                    available_at: available_at.unwrap_or(now),
                },
                now,
            )
            .await?;

        debug!(job_id = %job.id, task = %job.task, queue = %job.queue, "job pushed");
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.store.get_job(id).await?)
    }

    pub async fn find_jobs(&self, filter: &JobFilter) -> QueueResult<Vec<Job>> {
        Ok(self.store.find_jobs(filter).await?)
    }

    /// Most recent FAILED jobs first.
    pub async fn list_failed_jobs(&self, limit: u32) -> QueueResult<Vec<Job>> {
        let filter = JobFilter {
            newest_first: true,
            limit: Some(limit),
            ..JobFilter::status(JobStatus::Failed)
        };
        self.find_jobs(&filter).await
    }

    pub async fn mark_job_as_running(&self, job: &Job, worker: &Worker) -> QueueResult<Job> {
        let now = self.now();
        let patch = JobPatch {
            status: Some(JobStatus::Running),
            worker_id: Some(Some(worker.id)),
            started: Some(Some(now)),
            ..Default::default()
        };
        Ok(self.store.update_job(job.id, &patch, now).await?)
    }

    /// RUNNING -> COMPLETE. Re-applying it is a no-op apart from `finished`.
    pub async fn mark_job_as_complete(&self, job: &Job) -> QueueResult<Job> {
        let now = self.now();
        let patch = JobPatch {
            status: Some(JobStatus::Complete),
            worker_id: Some(None),
            finished: Some(Some(now)),
            ..Default::default()
        };
        Ok(self.store.update_job(job.id, &patch, now).await?)
    }

    /// Terminal failure: append the error, RUNNING -> FAILED.
    pub async fn mark_job_as_failed(&self, job: &Job, error: &TaskError) -> QueueResult<Job> {
        let now = self.now();
        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            worker_id: Some(None),
            finished: Some(Some(now)),
            errors: Some(appended(&job.errors, error.to_record(now))),
            ..Default::default()
        };
        Ok(self.store.update_job(job.id, &patch, now).await?)
    }

    /// Reschedule after a failure: append the error, bump `attempts` and push
    /// `available_at` out by the backoff for the new attempt.
    pub async fn retry_job(&self, job: &Job, error: &TaskError) -> QueueResult<Job> {
        let now = self.now();
        let attempt = job.attempts + 1;
        let backoff = self.config.backoff();
        let delay = self.with_rng(|rng| backoff.delay(attempt, rng));
        let available_at = now
            .checked_add_signed(delay)
            .ok_or_else(|| QueueError::validation(format!("retry delay of {delay} is out of range")))?;

        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            worker_id: Some(None),
            started: Some(None),
            finished: Some(None),
            available_at: Some(available_at),
            attempts: Some(attempt),
            errors: Some(appended(&job.errors, error.to_record(now))),
        };
        Ok(self.store.update_job(job.id, &patch, now).await?)
    }

    /// Retry while `attempts < max_retries`, otherwise fail for good.
    pub async fn handle_failure(
        &self,
        job: &Job,
        error: &TaskError,
        max_retries: u32,
    ) -> QueueResult<FailureOutcome> {
        if job.attempts < max_retries {
            let job = self.retry_job(job, error).await?;
            Ok(FailureOutcome::Retried {
                attempt: job.attempts,
                job,
                max_retries,
            })
        } else {
            let job = self.mark_job_as_failed(job, error).await?;
            Ok(FailureOutcome::Failed { job })
        }
    }

    /// Operator retry of a FAILED job: back to PENDING and due immediately.
    /// Attempts and error history are kept.
    pub async fn retry_failed_job(&self, id: JobId) -> QueueResult<Job> {
        let now = self.now();
        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            worker_id: Some(None),
            started: Some(None),
            finished: Some(None),
            available_at: Some(now),
            ..Default::default()
        };

        match self
            .store
            .update_job_if(id, JobStatus::Failed, &patch, now)
            .await?
        {
            Some(job) => {
                info!(job_id = %job.id, "failed job requeued");
                Ok(job)
            }
            None => match self.store.get_job(id).await? {
                Some(_) => Err(QueueError::validation(
                    "Job must be in a FAILED state in order to retry.",
                )),
                None => Err(QueueError::not_found(format!("job {id}"))),
            },
        }
    }
}

impl<S: QueueStore + ?Sized> core::fmt::Debug for Manager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Manager")
            .field("resolver", &self.resolver)
            .field("tasks", &self.tasks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn appended(errors: &[ErrorRecord], record: ErrorRecord) -> Vec<ErrorRecord> {
    let mut out = Vec::with_capacity(errors.len() + 1);
    out.extend_from_slice(errors);
    out.push(record);
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(unix)]
fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
