//! Postgres-backed queue store.
//!
//! ## Leasing
//!
//! `lease_next` opens a transaction, picks the lowest-id eligible row with
//! `FOR UPDATE SKIP LOCKED`, flips it to RUNNING and commits. Concurrent
//! callers never block on each other's candidate row; each skips to the next
//! unlocked one, so a row is handed to at most one worker.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Storage` |
//! | RowNotFound | N/A | `NotFound` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use jobhouse_core::{ErrorRecord, Job, JobId, JobStatus, NewJob, NewWorker, Worker, WorkerId};

use super::{JobFilter, JobPatch, JobStore, JobTimings, StoreError, StoreResult, WorkerStore};

/// DDL applied by `jobhouse migrate`. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_worker (
    id          BIGSERIAL PRIMARY KEY,
    token       VARCHAR(64) NOT NULL UNIQUE,
    queues      JSONB NOT NULL DEFAULT '[]'::jsonb,
    heartbeat   TIMESTAMPTZ(6) NOT NULL,
    created     TIMESTAMPTZ(6) NOT NULL DEFAULT now(),
    modified    TIMESTAMPTZ(6) NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS queue_job (
    id           BIGSERIAL PRIMARY KEY,
    queue        VARCHAR(255) NOT NULL,
    task         VARCHAR(255) NOT NULL,
    data         JSONB,
    status       TEXT NOT NULL DEFAULT 'PENDING'
                 CHECK (status IN ('PENDING', 'RUNNING', 'COMPLETE', 'FAILED')),
    worker_id    BIGINT NULL REFERENCES queue_worker(id) ON DELETE SET NULL,
    available_at TIMESTAMPTZ(6) NOT NULL,
    started      TIMESTAMPTZ(6),
    finished     TIMESTAMPTZ(6),
    errors       JSONB NOT NULL DEFAULT '[]'::jsonb,
    attempts     INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    created      TIMESTAMPTZ(6) NOT NULL DEFAULT now(),
    modified     TIMESTAMPTZ(6) NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS queue_job_lease_idx
    ON queue_job (status, queue, available_at, id);

CREATE INDEX IF NOT EXISTS queue_job_worker_idx
    ON queue_job (worker_id);
"#;

macro_rules! job_columns {
    () => {
        "id, queue, task, data, status, worker_id, available_at, started, finished, errors, attempts, created, modified"
    };
}

macro_rules! worker_columns {
    () => {
        "id, token, queues, heartbeat, created, modified"
    };
}

/// Postgres-backed job and worker tables.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: Arc<PgPool>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// One UPDATE for both plain and status-guarded patches. The guard is
    /// re-checked by Postgres after any row lock wait, so a concurrent
    /// transition makes this return `None` rather than overwrite it.
    async fn patch_job(
        &self,
        id: JobId,
        expected: Option<JobStatus>,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let errors = patch
            .errors
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query(concat!(
            "UPDATE queue_job SET ",
            "status = COALESCE($2::text, status), ",
            "worker_id = CASE WHEN $3 THEN $4::bigint ELSE worker_id END, ",
            "available_at = COALESCE($5::timestamptz, available_at), ",
            "started = CASE WHEN $6 THEN $7::timestamptz ELSE started END, ",
            "finished = CASE WHEN $8 THEN $9::timestamptz ELSE finished END, ",
            "errors = COALESCE($10::jsonb, errors), ",
            "attempts = COALESCE($11::int, attempts), ",
            "modified = $12 ",
            "WHERE id = $1 AND ($13::text IS NULL OR status = $13) RETURNING ",
            job_columns!()
        ))
        .bind(id.get())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.worker_id.is_some())
        .bind(patch.worker_id.flatten().map(|w| w.get()))
        .bind(patch.available_at)
        .bind(patch.started.is_some())
        .bind(patch.started.flatten())
        .bind(patch.finished.is_some())
        .bind(patch.finished.flatten())
        .bind(errors)
        .bind(patch.attempts.map(|a| a as i32))
        .bind(now)
        .bind(expected.map(|s| s.as_str()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }
}

#[async_trait]
impl JobStore for PostgresQueueStore {
    #[instrument(skip(self, job), fields(queue = %job.queue, task = %job.task), err)]
    async fn insert_job(&self, job: NewJob, now: DateTime<Utc>) -> StoreResult<Job> {
        let row = sqlx::query(concat!(
            "INSERT INTO queue_job (queue, task, data, status, available_at, errors, attempts, created, modified) ",
            "VALUES ($1, $2, $3, 'PENDING', $4, '[]'::jsonb, 0, $5, $5) ",
            "RETURNING ",
            job_columns!()
        ))
        .bind(&job.queue)
        .bind(&job.task)
        .bind(&job.data)
        .bind(job.available_at)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        job_from_row(&row)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let row = sqlx::query(concat!("SELECT ", job_columns!(), " FROM queue_job WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(worker_id = %worker, job_id = tracing::field::Empty), err)]
    async fn lease_next(
        &self,
        queues: &[String],
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let candidate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM queue_job
            WHERE status = 'PENDING'
              AND worker_id IS NULL
              AND queue = ANY($1)
              AND available_at <= $2
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queues)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lease_select", e))?;

        let Some(id) = candidate else {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit", e))?;
            return Ok(None);
        };

        let row = sqlx::query(concat!(
            "UPDATE queue_job SET status = 'RUNNING', worker_id = $2, started = $3, modified = $3 ",
            "WHERE id = $1 RETURNING ",
            job_columns!()
        ))
        .bind(id)
        .bind(worker.get())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lease_update", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Span::current().record("job_id", id);
        job_from_row(&row).map(Some)
    }

    #[instrument(skip(self, patch), fields(job_id = %id), err)]
    async fn update_job(
        &self,
        id: JobId,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        self.patch_job(id, None, patch, now)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    #[instrument(skip(self, patch), fields(job_id = %id, expected = %expected), err)]
    async fn update_job_if(
        &self,
        id: JobId,
        expected: JobStatus,
        patch: &JobPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        self.patch_job(id, Some(expected), patch, now).await
    }

    #[instrument(skip(self), err)]
    async fn find_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            job_columns!(),
            " FROM queue_job ",
            "WHERE ($1::text IS NULL OR status = $1) ",
            "AND ($2::text IS NULL OR queue = $2) ",
            "AND ($3::timestamptz IS NULL OR available_at <= $3) ",
            "AND ($4::timestamptz IS NULL OR available_at > $4) ",
            "ORDER BY CASE WHEN $5 THEN -id ELSE id END ",
            "LIMIT $6::bigint"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.queue.as_deref())
        .bind(filter.available_by)
        .bind(filter.available_after)
        .bind(filter.newest_first)
        .bind(filter.limit.map(i64::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_jobs(&self, filter: &JobFilter) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM queue_job
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR queue = $2)
              AND ($3::timestamptz IS NULL OR available_at <= $3)
              AND ($4::timestamptz IS NULL OR available_at > $4)
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.queue.as_deref())
        .bind(filter.available_by)
        .bind(filter.available_after)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_jobs", e))?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), err)]
    async fn reset_stuck_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(concat!(
            "UPDATE queue_job SET status = 'PENDING', started = NULL, modified = $1 ",
            "WHERE status = 'RUNNING' AND worker_id IS NULL AND started IS NOT NULL AND finished IS NULL ",
            "RETURNING ",
            job_columns!()
        ))
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_stuck_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(status = %status), err)]
    async fn delete_finished_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(concat!(
            "DELETE FROM queue_job WHERE status = $1 AND finished < $2 RETURNING ",
            job_columns!()
        ))
        .bind(status.as_str())
        .bind(before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_finished_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn oldest_available_at(
        &self,
        queue: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            r#"
            SELECT MIN(available_at)
            FROM queue_job
            WHERE status = 'PENDING'
              AND available_at <= $2
              AND ($1::text IS NULL OR queue = $1)
            "#,
        )
        .bind(queue)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("oldest_available_at", e))
    }

    #[instrument(skip(self), err)]
    async fn job_timings(
        &self,
        queue: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<JobTimings> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT AVG(EXTRACT(EPOCH FROM (started - available_at)))::float8
                   FROM queue_job
                  WHERE started >= $2
                    AND ($1::text IS NULL OR queue = $1)) AS avg_latency,
                (SELECT AVG(EXTRACT(EPOCH FROM (finished - started)))::float8
                   FROM queue_job
                  WHERE status = 'COMPLETE'
                    AND started IS NOT NULL
                    AND finished >= $2
                    AND ($1::text IS NULL OR queue = $1)) AS avg_duration,
                (SELECT COUNT(*)
                   FROM queue_job
                  WHERE status IN ('COMPLETE', 'FAILED')
                    AND finished >= $2
                    AND ($1::text IS NULL OR queue = $1)) AS throughput
            "#,
        )
        .bind(queue)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_timings", e))?;

        let throughput: i64 = row.try_get("throughput").map_err(row_error)?;
        Ok(JobTimings {
            avg_latency_secs: row.try_get("avg_latency").map_err(row_error)?,
            avg_duration_secs: row.try_get("avg_duration").map_err(row_error)?,
            throughput: throughput.max(0) as u64,
        })
    }

    #[instrument(skip(self), err)]
    async fn job_queues(&self) -> StoreResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT queue FROM queue_job ORDER BY queue")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_queues", e))
    }
}

#[async_trait]
impl WorkerStore for PostgresQueueStore {
    #[instrument(skip(self, worker), fields(token = %worker.token), err)]
    async fn insert_worker(&self, worker: NewWorker, now: DateTime<Utc>) -> StoreResult<Worker> {
        let row = sqlx::query(concat!(
            "INSERT INTO queue_worker (token, queues, heartbeat, created, modified) ",
            "VALUES ($1, $2, $3, $4, $4) RETURNING ",
            worker_columns!()
        ))
        .bind(&worker.token)
        .bind(serde_json::to_value(&worker.queues)?)
        .bind(worker.heartbeat)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_worker", e))?;

        worker_from_row(&row)
    }

    #[instrument(skip(self), fields(worker_id = %id), err)]
    async fn get_worker(&self, id: WorkerId) -> StoreResult<Option<Worker>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            worker_columns!(),
            " FROM queue_worker WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_worker", e))?;

        row.as_ref().map(worker_from_row).transpose()
    }

    #[instrument(skip(self), fields(worker_id = %id), err)]
    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<Worker> {
        let row = sqlx::query(concat!(
            "UPDATE queue_worker SET heartbeat = $2, modified = $2 WHERE id = $1 RETURNING ",
            worker_columns!()
        ))
        .bind(id.get())
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch_worker", e))?;

        match row {
            Some(row) => worker_from_row(&row),
            None => Err(StoreError::NotFound(format!("worker {id}"))),
        }
    }

    #[instrument(skip(self), fields(worker_id = %id), err)]
    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM queue_worker WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_worker", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list_workers(&self) -> StoreResult<Vec<Worker>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            worker_columns!(),
            " FROM queue_worker ORDER BY id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_workers", e))?;

        rows.iter().map(worker_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_stale_workers(&self, before: DateTime<Utc>) -> StoreResult<Vec<Worker>> {
        let rows = sqlx::query(concat!(
            "DELETE FROM queue_worker WHERE heartbeat < $1 RETURNING ",
            worker_columns!()
        ))
        .bind(before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_stale_workers", e))?;

        let mut workers = rows
            .iter()
            .map(worker_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }
}

fn row_error(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(format!("failed to decode row: {err}"))
}

fn job_from_row(row: &PgRow) -> StoreResult<Job> {
    let status: String = row.try_get("status").map_err(row_error)?;
    let errors: serde_json::Value = row.try_get("errors").map_err(row_error)?;
    let data: Option<serde_json::Value> = row.try_get("data").map_err(row_error)?;
    let worker_id: Option<i64> = row.try_get("worker_id").map_err(row_error)?;
    let attempts: i32 = row.try_get("attempts").map_err(row_error)?;
    let id: i64 = row.try_get("id").map_err(row_error)?;

    Ok(Job {
        id: JobId::new(id),
        queue: row.try_get("queue").map_err(row_error)?,
        task: row.try_get("task").map_err(row_error)?,
        data: data.unwrap_or(serde_json::Value::Null),
        status: status
            .parse()
            .map_err(|e: jobhouse_core::QueueError| StoreError::Serialization(e.to_string()))?,
        worker_id: worker_id.map(WorkerId::new),
        available_at: row.try_get("available_at").map_err(row_error)?,
        started: row.try_get("started").map_err(row_error)?,
        finished: row.try_get("finished").map_err(row_error)?,
        errors: serde_json::from_value::<Vec<ErrorRecord>>(errors)?,
        attempts: attempts.max(0) as u32,
        created: row.try_get("created").map_err(row_error)?,
        modified: row.try_get("modified").map_err(row_error)?,
    })
}

fn worker_from_row(row: &PgRow) -> StoreResult<Worker> {
    let id: i64 = row.try_get("id").map_err(row_error)?;
    let queues: serde_json::Value = row.try_get("queues").map_err(row_error)?;

    Ok(Worker {
        id: WorkerId::new(id),
        token: row.try_get("token").map_err(row_error)?,
        queues: serde_json::from_value(queues)?,
        heartbeat: row.try_get("heartbeat").map_err(row_error)?,
        created: row.try_get("created").map_err(row_error)?,
        modified: row.try_get("modified").map_err(row_error)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("row not found in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    //! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

    use super::*;
    use chrono::Duration;

    async fn store() -> PostgresQueueStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PostgresQueueStore::connect(&url, 8).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}.{}", rand::random::<u32>())
    }

    #[tokio::test]
    #[ignore]
    async fn concurrent_leases_never_share_a_row() {
        let store = store().await;
        let queue = unique("pg.lease");
        let now = Utc::now();

        let mut workers = Vec::new();
        for i in 0..4 {
            let w = store
                .insert_worker(
                    NewWorker {
                        token: unique(&format!("w{i}")),
                        queues: vec![queue.clone()],
                        heartbeat: now,
                    },
                    now,
                )
                .await
                .unwrap();
            workers.push(w);
        }
        for n in 0..20 {
            store
                .insert_job(
                    NewJob {
                        queue: queue.clone(),
                        task: "t".into(),
                        data: serde_json::json!({ "n": n }),
                        available_at: now - Duration::seconds(1),
                    },
                    now,
                )
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for w in &workers {
            let store = store.clone();
            let queues = vec![queue.clone()];
            let id = w.id;
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = store.lease_next(&queues, id, Utc::now()).await.unwrap() {
                    got.push(job.id);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);

        for w in workers {
            store.delete_worker(w.id).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore]
    async fn patch_writes_nulls_only_when_asked() {
        let store = store().await;
        let now = Utc::now();
        let job = store
            .insert_job(
                NewJob {
                    queue: unique("pg.patch"),
                    task: "t".into(),
                    data: serde_json::Value::Null,
                    available_at: now,
                },
                now,
            )
            .await
            .unwrap();

        let updated = store
            .update_job(
                job.id,
                &JobPatch {
                    started: Some(Some(now)),
                    attempts: Some(2),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(updated.started.is_some());
        assert_eq!(updated.attempts, 2);

        let cleared = store
            .update_job(
                job.id,
                &JobPatch {
                    started: Some(None),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(cleared.started.is_none());
        assert_eq!(cleared.attempts, 2);
    }

    #[tokio::test]
    #[ignore]
    async fn guarded_update_skips_rows_in_another_status() {
        let store = store().await;
        let now = Utc::now();
        let job = store
            .insert_job(
                NewJob {
                    queue: unique("pg.guard"),
                    task: "t".into(),
                    data: serde_json::Value::Null,
                    available_at: now,
                },
                now,
            )
            .await
            .unwrap();
        let to_pending = JobPatch {
            status: Some(JobStatus::Pending),
            available_at: Some(now),
            ..Default::default()
        };

        let skipped = store
            .update_job_if(job.id, JobStatus::Failed, &to_pending, now)
            .await
            .unwrap();
        assert!(skipped.is_none());

        store
            .update_job(
                job.id,
                &JobPatch {
                    status: Some(JobStatus::Failed),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        let applied = store
            .update_job_if(job.id, JobStatus::Failed, &to_pending, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.status, JobStatus::Pending);
    }
}
