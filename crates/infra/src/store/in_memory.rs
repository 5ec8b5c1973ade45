//! In-memory queue store for tests/dev.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobhouse_core::{Job, JobId, JobStatus, NewJob, NewWorker, Worker, WorkerId};

use super::{JobFilter, JobPatch, JobStore, JobTimings, StoreError, StoreResult, WorkerStore};

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, Job>,
    workers: BTreeMap<WorkerId, Worker>,
    next_job_id: i64,
    next_worker_id: i64,
}

/// Mutex-guarded job and worker tables.
///
/// Every operation runs under one lock, which gives leasing the same
/// exclusivity a locking transaction gives the SQL backend.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: Mutex<State>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".into()))
    }

    /// Overwrite a job row as-is. Lets tests stage rows the manager would
    /// never produce directly (e.g. back-dated `finished`).
    pub fn put_job(&self, job: Job) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.next_job_id = state.next_job_id.max(job.id.get());
        state.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn put_worker(&self, worker: Worker) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.next_worker_id = state.next_worker_id.max(worker.id.get());
        state.workers.insert(worker.id, worker);
        Ok(())
    }
}

impl State {
    /// `ON DELETE SET NULL` on `queue_job.worker_id`.
    fn release_jobs_of(&mut self, worker: WorkerId) {
        for job in self.jobs.values_mut() {
            if job.worker_id == Some(worker) {
                job.worker_id = None;
            }
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[async_trait]
impl JobStore for InMemoryQueueStore {
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> StoreResult<Job> {
        let mut state = self.lock()?;
        state.next_job_id += 1;
        let id = JobId::new(state.next_job_id);
        let row = Job {
            id,
            queue: job.queue,
            task: job.task,
            data: job.data,
            status: JobStatus::Pending,
            worker_id: None,
            available_at: job.available_at,
            started: None,
            finished: None,
            errors: Vec::new(),
            attempts: 0,
            created: now,
            modified: now,
        };
        state.jobs.insert(id, row.clone());
        Ok(row)
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn lease_next(
        &self,
        queues: &[String],
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let mut state = self.lock()?;
        // BTreeMap iterates in ascending id order
        let next = state
            .jobs
            .values_mut()
            .find(|j| j.is_available(now) && queues.iter().any(|q| *q == j.queue));

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.worker_id = Some(worker);
            job.started = Some(now);
            job.modified = now;
            job.clone()
        }))
    }

    async fn update_job(
        &self,
        id: JobId,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        patch.apply(job, now);
        Ok(job.clone())
    }

    async fn update_job_if(
        &self,
        id: JobId,
        expected: JobStatus,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let mut state = self.lock()?;
        Ok(state
            .jobs
            .get_mut(&id)
            .filter(|job| job.status == expected)
            .map(|job| {
                patch.apply(job, now);
                job.clone()
            }))
    }

    async fn find_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let state = self.lock()?;
        let matching = state.jobs.values().filter(|j| filter.matches(j));
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        let rows = if filter.newest_first {
            matching.rev().take(limit).cloned().collect()
        } else {
            matching.take(limit).cloned().collect()
        };
        Ok(rows)
    }

    async fn count_jobs(&self, filter: &JobFilter) -> StoreResult<u64> {
        let state = self.lock()?;
        Ok(state.jobs.values().filter(|j| filter.matches(j)).count() as u64)
    }

    async fn reset_stuck_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let mut state = self.lock()?;
        let mut reset = Vec::new();
        for job in state.jobs.values_mut().filter(|j| j.is_stuck()) {
            job.status = JobStatus::Pending;
            job.started = None;
            job.modified = now;
            reset.push(job.clone());
        }
        Ok(reset)
    }

    async fn delete_finished_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        let mut state = self.lock()?;
        let ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status == status && j.finished.is_some_and(|f| f < before))
            .map(|j| j.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.jobs.remove(&id))
            .collect())
    }

    async fn oldest_available_at(
        &self,
        queue: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.available_at <= now)
            .filter(|j| queue.is_none_or(|q| j.queue == q))
            .map(|j| j.available_at)
            .min())
    }

    async fn job_timings(
        &self,
        queue: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<JobTimings> {
        let state = self.lock()?;
        let in_queue = |j: &&Job| queue.is_none_or(|q| j.queue == q);

        let latencies: Vec<f64> = state
            .jobs
            .values()
            .filter(in_queue)
            .filter_map(|j| j.started.filter(|s| *s >= since).map(|s| (j, s)))
            .map(|(j, s)| secs_between(j.available_at, s))
            .collect();

        let durations: Vec<f64> = state
            .jobs
            .values()
            .filter(in_queue)
            .filter(|j| j.status == JobStatus::Complete)
            .filter_map(|j| match (j.started, j.finished) {
                (Some(s), Some(f)) if f >= since => Some(secs_between(s, f)),
                _ => None,
            })
            .collect();

        let throughput = state
            .jobs
            .values()
            .filter(in_queue)
            .filter(|j| j.status.is_terminal() && j.finished.is_some_and(|f| f >= since))
            .count() as u64;

        Ok(JobTimings {
            avg_latency_secs: mean(&latencies),
            avg_duration_secs: mean(&durations),
            throughput,
        })
    }

    async fn job_queues(&self) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        let queues: BTreeSet<&String> = state.jobs.values().map(|j| &j.queue).collect();
        Ok(queues.into_iter().cloned().collect())
    }
}

#[async_trait]
impl WorkerStore for InMemoryQueueStore {
    async fn insert_worker(&self, worker: NewWorker, now: DateTime<Utc>) -> StoreResult<Worker> {
        let mut state = self.lock()?;
        if state.workers.values().any(|w| w.token == worker.token) {
            return Err(StoreError::Conflict(format!(
                "worker token {} already registered",
                worker.token
            )));
        }
        state.next_worker_id += 1;
        let id = WorkerId::new(state.next_worker_id);
        let row = Worker {
            id,
            token: worker.token,
            queues: worker.queues,
            heartbeat: worker.heartbeat,
            created: now,
            modified: now,
        };
        state.workers.insert(id, row.clone());
        Ok(row)
    }

    async fn get_worker(&self, id: WorkerId) -> StoreResult<Option<Worker>> {
        Ok(self.lock()?.workers.get(&id).cloned())
    }

    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<Worker> {
        let mut state = self.lock()?;
        let worker = state
            .workers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("worker {id}")))?;
        worker.heartbeat = at;
        worker.modified = at;
        Ok(worker.clone())
    }

    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let removed = state.workers.remove(&id).is_some();
        if removed {
            state.release_jobs_of(id);
        }
        Ok(removed)
    }

    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        Ok(self.lock()?.workers.values().cloned().collect())
    }

    async fn delete_stale_workers(&self, before: DateTime<Utc>) -> StoreResult<Vec<Worker>> {
        let mut state = self.lock()?;
        let stale: Vec<WorkerId> = state
            .workers
            .values()
            .filter(|w| w.heartbeat < before)
            .map(|w| w.id)
            .collect();

        let mut deleted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(worker) = state.workers.remove(&id) {
                state.release_jobs_of(id);
                deleted.push(worker);
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn new_job(queue: &str, available_at: DateTime<Utc>) -> NewJob {
        NewJob {
            queue: queue.into(),
            task: "t".into(),
            data: serde_json::Value::Null,
            available_at,
        }
    }

    fn new_worker(token: &str) -> NewWorker {
        NewWorker {
            token: token.into(),
            queues: vec!["a".into()],
            heartbeat: t0(),
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let store = InMemoryQueueStore::new();
        let a = store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        let b = store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        assert!(a.id < b.id);
    }

    #[tokio::test]
    async fn lease_skips_other_queues_and_future_rows() {
        let store = InMemoryQueueStore::new();
        let w = store.insert_worker(new_worker("w"), t0()).await.unwrap();
        store
            .insert_job(new_job("b", t0()), t0())
            .await
            .unwrap();
        store
            .insert_job(new_job("a", t0() + Duration::seconds(10)), t0())
            .await
            .unwrap();
        let due = store.insert_job(new_job("a", t0()), t0()).await.unwrap();

        let leased = store
            .lease_next(&["a".to_string()], w.id, t0())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.id, due.id);
        assert_eq!(leased.status, JobStatus::Running);
        assert_eq!(leased.worker_id, Some(w.id));
        assert_eq!(leased.started, Some(t0()));

        assert!(
            store
                .lease_next(&["a".to_string()], w.id, t0())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_tokens_conflict() {
        let store = InMemoryQueueStore::new();
        store.insert_worker(new_worker("dup"), t0()).await.unwrap();
        let err = store.insert_worker(new_worker("dup"), t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_a_worker_nulls_its_jobs() {
        let store = InMemoryQueueStore::new();
        let w = store.insert_worker(new_worker("w"), t0()).await.unwrap();
        store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        let leased = store
            .lease_next(&["a".to_string()], w.id, t0())
            .await
            .unwrap()
            .unwrap();

        assert!(store.delete_worker(w.id).await.unwrap());
        let after = store.get_job(leased.id).await.unwrap().unwrap();
        assert_eq!(after.worker_id, None);
        assert_eq!(after.status, JobStatus::Running);
        assert!(after.is_stuck());
        assert!(!store.delete_worker(w.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let store = InMemoryQueueStore::new();
        let err = store
            .update_job(JobId::new(99), &JobPatch::default(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn find_jobs_honours_order_and_limit() {
        let store = InMemoryQueueStore::new();
        for _ in 0..5 {
            store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        }
        let filter = JobFilter {
            newest_first: true,
            limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<i64> = store
            .find_jobs(&filter)
            .await
            .unwrap()
            .iter()
            .map(|j| j.id.get())
            .collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[tokio::test]
    async fn guarded_update_only_applies_in_expected_status() {
        let store = InMemoryQueueStore::new();
        let w = store.insert_worker(new_worker("w"), t0()).await.unwrap();
        let job = store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        store
            .lease_next(&["a".to_string()], w.id, t0())
            .await
            .unwrap()
            .unwrap();

        let requeue = JobPatch {
            status: Some(JobStatus::Pending),
            worker_id: Some(None),
            ..Default::default()
        };
        let skipped = store
            .update_job_if(job.id, JobStatus::Failed, &requeue, t0())
            .await
            .unwrap();
        assert!(skipped.is_none());
        let still = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(still.status, JobStatus::Running);
        assert_eq!(still.worker_id, Some(w.id));

        let applied = store
            .update_job_if(job.id, JobStatus::Running, &requeue, t0())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.status, JobStatus::Pending);
        assert!(
            store
                .update_job_if(JobId::new(99), JobStatus::Pending, &requeue, t0())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn staged_rows_are_visible_to_maintenance_queries() {
        let store = InMemoryQueueStore::new();
        let long_ago = t0() - Duration::days(90);
        store
            .put_job(Job {
                id: JobId::new(10),
                queue: "a".into(),
                task: "t".into(),
                data: serde_json::Value::Null,
                status: JobStatus::Complete,
                worker_id: None,
                available_at: long_ago,
                started: Some(long_ago),
                finished: Some(long_ago),
                errors: Vec::new(),
                attempts: 0,
                created: long_ago,
                modified: long_ago,
            })
            .unwrap();
        store
            .put_worker(Worker {
                id: WorkerId::new(4),
                token: "old".into(),
                queues: vec!["a".into()],
                heartbeat: long_ago,
                created: long_ago,
                modified: long_ago,
            })
            .unwrap();

        let next = store.insert_job(new_job("a", t0()), t0()).await.unwrap();
        assert_eq!(next.id, JobId::new(11));
        let worker = store.insert_worker(new_worker("new"), t0()).await.unwrap();
        assert_eq!(worker.id, WorkerId::new(5));

        let rotated = store
            .delete_finished_jobs(JobStatus::Complete, t0() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].id, JobId::new(10));

        let stale = store
            .delete_stale_workers(t0() - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].token, "old");
    }
}
