//! Long-running worker loop.
//!
//! - Registers a worker row and runs each queue's `setup` hook
//! - Leases, runs and settles jobs until the cancellation token fires
//! - Refreshes queues periodically and heartbeats every iteration
//! - Never aborts an in-flight job: cancellation is only checked between jobs

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use jobhouse_core::{Job, Queue, QueueError, QueueRef, QueueResult, TaskError, Worker};

use crate::manager::{FailureOutcome, Manager};
use crate::store::QueueStore;

/// Counters collected over one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub processed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    /// Persistence errors swallowed by the loop
    pub errors: u64,
}

/// Drives a [`Manager`] as one worker process.
pub struct WorkerLoop<S: QueueStore + ?Sized = dyn QueueStore> {
    manager: Arc<Manager<S>>,
}

impl<S: QueueStore + ?Sized> Clone for WorkerLoop<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<S: QueueStore + ?Sized> WorkerLoop<S> {
    pub fn new(manager: Arc<Manager<S>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<Manager<S>> {
        &self.manager
    }

    /// Serve `queues` (default queue when empty) until `cancel` fires.
    ///
    /// Fails only if the queues cannot be resolved or the worker cannot be
    /// registered; everything after that is logged and survived.
    pub async fn run(
        &self,
        queues: &[QueueRef],
        cancel: CancellationToken,
    ) -> QueueResult<WorkerReport> {
        let queues: Vec<Arc<dyn Queue>> = if queues.is_empty() {
            vec![self.manager.resolve_queue("default")?]
        } else {
            queues
                .iter()
                .map(|q| self.manager.resolve_queue(q.clone()))
                .collect::<QueueResult<_>>()?
        };
        let refs: Vec<QueueRef> = queues.iter().cloned().map(QueueRef::from).collect();
        let ids: Vec<String> = queues.iter().map(|q| q.id().to_string()).collect();

        let mut worker = self.manager.register_worker(&refs).await?;
        let mut report = WorkerReport::default();

        for queue in &queues {
            let started = Instant::now();
            match queue.setup(&worker).await {
                Ok(()) => info!(
                    worker_id = %worker.id,
                    queue = queue.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "queue setup done"
                ),
                Err(err) => warn!(
                    worker_id = %worker.id,
                    queue = queue.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "queue setup failed"
                ),
            }
        }

        let refresh_interval = self.manager.config().refresh_interval();
        let mut last_refresh: HashMap<String, Instant> =
            ids.iter().map(|id| (id.clone(), Instant::now())).collect();

        info!(worker_id = %worker.id, queues = ?ids, "waiting for jobs");

        while !cancel.is_cancelled() {
            match self.manager.get_next_job(&ids, &worker).await {
                Ok(Some(job)) => self.process(job, &mut report).await,
                Ok(None) => self.idle(&cancel).await,
                Err(err) => {
                    report.errors += 1;
                    error!(worker_id = %worker.id, error = %err, "lease failed");
                    self.idle(&cancel).await;
                }
            }

            for queue in &queues {
                let due = last_refresh
                    .get(queue.id())
                    .is_none_or(|at| at.elapsed() >= refresh_interval);
                if !due {
                    continue;
                }
                let started = Instant::now();
                match queue.refresh(&worker).await {
                    Ok(()) => info!(
                        worker_id = %worker.id,
                        queue = queue.id(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "queue refreshed"
                    ),
                    Err(err) => warn!(
                        worker_id = %worker.id,
                        queue = queue.id(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "queue refresh failed"
                    ),
                }
                last_refresh.insert(queue.id().to_string(), Instant::now());
            }

            match self.manager.touch_worker(&worker).await {
                Ok(fresh) => worker = fresh,
                Err(QueueError::NotFound(_)) => {
                    // Evicted while alive (e.g. one job outlived the stale threshold).
                    warn!(worker_id = %worker.id, "worker row missing, registering again");
                    match self.manager.register_worker(&refs).await {
                        Ok(fresh) => worker = fresh,
                        Err(err) => {
                            report.errors += 1;
                            error!(error = %err, "worker re-registration failed");
                        }
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    error!(worker_id = %worker.id, error = %err, "heartbeat failed");
                }
            }
        }

        info!(worker_id = %worker.id, "shutdown: stopping job loop");
        if let Err(err) = self.manager.unregister_worker(&worker).await {
            report.errors += 1;
            error!(worker_id = %worker.id, error = %err, "failed to unregister worker");
        }
        info!(
            worker_id = %worker.id,
            processed = report.processed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "worker stopped"
        );
        Ok(report)
    }

    /// Run one leased job to a settled state.
    async fn process(&self, job: Job, report: &mut WorkerReport) {
        report.processed += 1;
        let started = Instant::now();
        info!(job_id = %job.id, task = %job.task, queue = %job.queue, "RUNNING");

        let (result, max_retries) = match self.manager.tasks().create(&job.task) {
            Ok(task) => {
                let run = AssertUnwindSafe(task.run(&job.data)).catch_unwind().await;
                let result = match run {
                    Ok(result) => result,
                    Err(panic) => Err(TaskError::from_panic(panic.as_ref())),
                };
                (result, task.max_retries())
            }
            Err(_) => (Err(TaskError::unknown_task(&job.task)), 0),
        };
        let elapsed_secs = started.elapsed().as_secs_f64();

        let settled = match result {
            Ok(()) => self.manager.mark_job_as_complete(&job).await.map(|_| {
                report.completed += 1;
                info!(job_id = %job.id, task = %job.task, elapsed_secs, "COMPLETE");
            }),
            Err(task_err) => self
                .manager
                .handle_failure(&job, &task_err, max_retries)
                .await
                .map(|outcome| match outcome {
                    FailureOutcome::Retried {
                        job,
                        attempt,
                        max_retries,
                    } => {
                        report.retried += 1;
                        info!(
                            job_id = %job.id,
                            task = %job.task,
                            elapsed_secs,
                            error = %task_err,
                            next_at = %job.available_at.format("%H:%M:%S"),
                            "RETRY {attempt}/{max_retries}"
                        );
                    }
                    FailureOutcome::Failed { job } => {
                        report.failed += 1;
                        warn!(
                            job_id = %job.id,
                            task = %job.task,
                            elapsed_secs,
                            error = %task_err,
                            "FAILED"
                        );
                    }
                }),
        };

        if let Err(err) = settled {
            report.errors += 1;
            error!(job_id = %job.id, error = %err, "failed to record job outcome");
        }
    }

    /// Sleep `wait_time + U(0, wait_jitter)` or until cancelled.
    async fn idle(&self, cancel: &CancellationToken) {
        let config = self.manager.config();
        let jitter_ms = config.wait_jitter().as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        let wait = config.wait_time() + Duration::from_millis(extra);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::store::{InMemoryQueueStore, WorkerStore};
    use async_trait::async_trait;
    use jobhouse_core::{JobStatus, Task, TaskRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Boom;

    #[async_trait]
    impl Task for Boom {
        fn max_retries(&self) -> u32 {
            0
        }

        async fn run(&self, _data: &serde_json::Value) -> Result<(), TaskError> {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct CountingQueue {
        setups: Arc<AtomicUsize>,
        refreshes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Queue for CountingQueue {
        fn id(&self) -> &str {
            "test.counting"
        }

        async fn setup(&self, _worker: &Worker) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("setup is best-effort")
        }

        async fn refresh(&self, _worker: &Worker) -> anyhow::Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("refresh is best-effort")
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            worker_wait_time: 5,
            worker_wait_jitter: 0,
            ..QueueConfig::default()
        }
    }

    #[tokio::test]
    async fn panicking_task_is_failed_not_propagated() {
        let store = InMemoryQueueStore::arc();
        let mut tasks = TaskRegistry::with_builtins();
        tasks.register("test.boom", || Arc::new(Boom) as Arc<dyn Task>);
        let manager = Arc::new(Manager::new(store.clone(), fast_config()).with_tasks(tasks));
        let job = manager
            .push("test.boom", &serde_json::json!({}), None, None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let worker = WorkerLoop::new(manager.clone());
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(&[], cancel).await })
        };

        for _ in 0..200 {
            let j = manager.get_job(job.id).await.unwrap().unwrap();
            if j.status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let report = handle.await.unwrap().unwrap();

        let j = manager.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.errors.len(), 1);
        assert_eq!(j.errors[0].kind, "Panic");
        assert_eq!(j.errors[0].message, "boom");
        assert_eq!(report.failed, 1);
        assert!(manager.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_failure_does_not_stop_the_worker() {
        let store = InMemoryQueueStore::arc();
        let setups = Arc::new(AtomicUsize::new(0));
        let queue: Arc<dyn Queue> = Arc::new(CountingQueue {
            setups: setups.clone(),
            ..CountingQueue::default()
        });
        let manager = Arc::new(Manager::new(store, fast_config()));
        let worker = WorkerLoop::new(manager.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = worker.run(&[QueueRef::from(queue)], cancel).await.unwrap();

        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(report, WorkerReport::default());
        assert!(manager.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_refresh_hook_keeps_the_loop_serving() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let queue: Arc<dyn Queue> = Arc::new(CountingQueue {
            refreshes: refreshes.clone(),
            ..CountingQueue::default()
        });
        let config = QueueConfig {
            worker_refresh_interval: 0,
            ..fast_config()
        };
        let manager = Arc::new(Manager::new(InMemoryQueueStore::arc(), config));

        let cancel = CancellationToken::new();
        let handle = {
            let worker = WorkerLoop::new(manager.clone());
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(&[QueueRef::from(queue)], cancel).await })
        };

        for _ in 0..200 {
            if refreshes.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(refreshes.load(Ordering::SeqCst) >= 3);

        let job = manager
            .push(jobhouse_core::DO_NOTHING, &(), Some(QueueRef::from(queue)), None)
            .await
            .unwrap();
        for _ in 0..200 {
            let j = manager.get_job(job.id).await.unwrap().unwrap();
            if j.status == JobStatus::Complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.errors, 0);
        let j = manager.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(j.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn evicted_worker_registers_again() {
        let config = QueueConfig {
            worker_heartbeat_debounce: 0,
            ..fast_config()
        };
        let manager = Arc::new(Manager::new(InMemoryQueueStore::arc(), config));

        let cancel = CancellationToken::new();
        let handle = {
            let worker = WorkerLoop::new(manager.clone());
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(&[], cancel).await })
        };

        let mut first = None;
        for _ in 0..200 {
            if let Some(w) = manager.list_workers().await.unwrap().pop() {
                first = Some(w);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let first = first.expect("worker should register");
        assert!(manager.store().delete_worker(first.id).await.unwrap());

        let mut second = None;
        for _ in 0..200 {
            if let Some(w) = manager.list_workers().await.unwrap().pop() {
                second = Some(w);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = second.expect("worker should register again");
        assert_ne!(second.id, first.id);
        assert_ne!(second.token, first.token);
        assert_eq!(second.queues, first.queues);

        cancel.cancel();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.errors, 0);
        assert!(manager.list_workers().await.unwrap().is_empty());
    }
}
