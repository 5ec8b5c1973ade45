use tracing::debug;

use jobhouse_core::{Job, QueueResult, Worker};

use super::Manager;
use crate::store::QueueStore;

impl<S: QueueStore + ?Sized> Manager<S> {
    /// Lease the next job for `worker` from `queues` (resolved identifiers).
    ///
    /// Picks the lowest-id PENDING, unleased row whose `available_at` has
    /// passed and moves it to RUNNING in one atomic step. `None` when nothing
    /// is eligible.
    pub async fn get_next_job(&self, queues: &[String], worker: &Worker) -> QueueResult<Option<Job>> {
        if queues.is_empty() {
            return Ok(None);
        }

        let now = self.now();
        let job = self.store.lease_next(queues, worker.id, now).await?;

        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                worker_id = %worker.id,
                queue = %job.queue,
                task = %job.task,
                "job leased"
            );
        }
        Ok(job)
    }
}
