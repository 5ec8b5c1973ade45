use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobhouse_core::{ErrorRecord, Job, JobId, JobStatus, Worker};
use jobhouse_infra::manager::{QueueStats, QueueSummary};
use jobhouse_infra::store::JobTimings;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    /// Number or numeric string; missing, zero or garbage is a validation error.
    #[serde(default)]
    pub job_id: Option<Value>,
}

impl RetryRequest {
    pub fn job_id(&self) -> Option<JobId> {
        let id = match self.job_id.as_ref()? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (id > 0).then(|| JobId::new(id))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub queue: Option<String>,
    pub limit: Option<u32>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiType {
    Number,
    /// Unix timestamp the UI renders as "n minutes ago"
    Age,
    /// Seconds
    Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub label: &'static str,
    pub value: Value,
    pub hint: Option<&'static str>,
    #[serde(rename = "type")]
    pub kind: KpiType,
}

impl Kpi {
    fn new(label: &'static str, value: impl Into<Value>, hint: Option<&'static str>, kind: KpiType) -> Self {
        Self {
            label,
            value: value.into(),
            hint,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Labelled {
    pub label: &'static str,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<&'static str>,
}

fn labelled(label: &'static str, value: impl Into<Value>, class: Option<&'static str>) -> Labelled {
    Labelled {
        label,
        value: value.into(),
        class,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stamp {
    pub unix: i64,
    pub user: String,
}

impl From<DateTime<Utc>> for Stamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self {
            unix: at.timestamp(),
            user: at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub label: String,
    pub jobs: Vec<Labelled>,
    pub latency: Vec<Labelled>,
    pub duration: Vec<Labelled>,
    pub throughput: Vec<Labelled>,
}

impl QueueView {
    /// `hour` carries the counts and 1h timings, `day` the 24h timings.
    pub fn new(hour: &QueueSummary, day: &JobTimings) -> Self {
        let jobs = &hour.jobs;
        Self {
            label: hour.queue.clone(),
            jobs: vec![
                labelled("Pending", jobs.pending, Some("warning")),
                labelled("Scheduled", jobs.scheduled, Some("warning")),
                labelled("Running", jobs.running, Some("info")),
                labelled("Complete", jobs.complete, Some("success")),
                labelled("Failed", jobs.failed, Some("danger")),
            ],
            latency: vec![labelled("1h", hour.timings.avg_latency_secs, None)],
            duration: vec![labelled("1h", hour.timings.avg_duration_secs, None)],
            throughput: vec![
                labelled("1h", hour.timings.throughput, None),
                labelled("24h", day.throughput, None),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerView {
    pub id: i64,
    pub token: String,
    pub queues: Vec<String>,
    pub created: Stamp,
    pub heartbeat: Stamp,
    pub stale: bool,
}

impl WorkerView {
    pub fn new(worker: &Worker, now: DateTime<Utc>, stale_after: Duration) -> Self {
        Self {
            id: worker.id.get(),
            token: worker.token.clone(),
            queues: worker.queues.clone(),
            created: worker.created.into(),
            heartbeat: worker.heartbeat.into(),
            stale: worker.is_stale(now, stale_after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedJobView {
    pub id: i64,
    pub queue: String,
    pub task: String,
    pub payload: Value,
    pub finished: Option<Stamp>,
    pub attempts: u32,
    pub errors: Vec<ErrorRecord>,
}

impl From<&Job> for FailedJobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.get(),
            queue: job.queue.clone(),
            task: job.task.clone(),
            payload: job.data.clone(),
            finished: job.finished.map(Stamp::from),
            attempts: job.attempts,
            errors: job.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub kpis: Vec<Kpi>,
    pub queues: Vec<QueueView>,
    pub workers: Vec<WorkerView>,
    pub failed: Vec<FailedJobView>,
}

pub fn kpis(stats: &QueueStats) -> Vec<Kpi> {
    let jobs = &stats.jobs;
    vec![
        Kpi::new("Workers (total)", stats.workers.total, None, KpiType::Number),
        Kpi::new(
            "Workers (active)",
            stats.workers.active,
            Some("Heartbeat within threshold"),
            KpiType::Number,
        ),
        Kpi::new(
            "Workers (stale)",
            stats.workers.stale,
            Some("No heartbeat beyond threshold; safe to clean up"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs (total)",
            jobs.total,
            Some("Total number of jobs across all queues, in any state"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs pending",
            jobs.pending,
            Some("Available for workers to process"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs scheduled",
            jobs.scheduled,
            Some("Pending jobs not yet available for workers to process"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs running",
            jobs.running,
            Some("Jobs actively being worked on"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs complete",
            jobs.complete,
            Some("Completed jobs without errors"),
            KpiType::Number,
        ),
        Kpi::new(
            "Jobs failed",
            jobs.failed,
            Some("Jobs which have reached maximum number of retry attempts and will no longer be processed"),
            KpiType::Number,
        ),
        Kpi::new(
            "Oldest queued age",
            stats.oldest_available_at.map(|at| at.timestamp()),
            Some("The age of the oldest queued job"),
            KpiType::Age,
        ),
        Kpi::new(
            "Avg. latency (24h)",
            stats.last_24h.avg_latency_secs,
            Some("Average time between when a job became available and when a worker picks it up"),
            KpiType::Duration,
        ),
        Kpi::new(
            "Avg. duration (24h)",
            stats.last_24h.avg_duration_secs,
            Some("Average length of time jobs take to complete"),
            KpiType::Duration,
        ),
        Kpi::new(
            "Throughput (1h)",
            stats.throughput_1h,
            Some("Number of jobs finished (both completed and failed) over the past 1h"),
            KpiType::Number,
        ),
        Kpi::new(
            "Throughput (24h)",
            stats.last_24h.throughput,
            Some("Number of jobs finished (both completed and failed) over the past 24h"),
            KpiType::Number,
        ),
    ]
}

/// Status filter for `GET /jobs`, case-insensitive.
pub fn parse_status(raw: Option<&str>) -> Result<Option<JobStatus>, String> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<JobStatus>().map_err(|e| e.to_string()))
        .transpose()
}
