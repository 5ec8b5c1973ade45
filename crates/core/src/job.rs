//! Job record, status machine and structured error records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::QueueError;
use crate::id::{JobId, WorkerId};

/// Maximum number of characters kept from a failure trace.
pub const MAX_TRACE_CHARS: usize = 2000;

/// Marker appended to a truncated trace.
pub const TRACE_ELLIPSIS: &str = "…";

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Queued, waiting for `available_at` and a free worker
    Pending,
    /// Leased by a worker
    Running,
    /// Finished successfully
    Complete,
    /// Exhausted retries
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETE" => Ok(JobStatus::Complete),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(QueueError::validation(format!("unknown job status {other}"))),
        }
    }
}

/// One failure, appended to [`Job::errors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub trace: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Cut `trace` to [`MAX_TRACE_CHARS`] characters, marking the cut.
    pub fn truncate_trace(trace: &str) -> String {
        match trace.char_indices().nth(MAX_TRACE_CHARS) {
            Some((byte_idx, _)) => format!("{}{}", &trace[..byte_idx], TRACE_ELLIPSIS),
            None => trace.to_string(),
        }
    }
}

/// A persisted work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Resolved queue implementation identifier
    pub queue: String,
    /// Task identifier looked up in the task registry
    pub task: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub worker_id: Option<WorkerId>,
    pub available_at: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorRecord>,
    /// Retry transitions applied so far
    pub attempts: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Job {
    /// Eligible for leasing at `now`, ignoring queue filtering.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.worker_id.is_none() && self.available_at <= now
    }

    /// Left RUNNING with no owner: the worker was evicted mid-job.
    pub fn is_stuck(&self) -> bool {
        self.status == JobStatus::Running
            && self.worker_id.is_none()
            && self.started.is_some()
            && self.finished.is_none()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }
}

/// Insert request produced by `push`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue: String,
    pub task: String,
    pub data: serde_json::Value,
    pub available_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(status: JobStatus) -> Job {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Job {
            id: JobId::new(1),
            queue: "jobhouse.default".into(),
            task: "jobhouse.do_nothing".into(),
            data: serde_json::Value::Null,
            status,
            worker_id: None,
            available_at: t,
            started: None,
            finished: None,
            errors: Vec::new(),
            attempts: 0,
            created: t,
            modified: t,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_value(JobStatus::Complete).unwrap(),
            serde_json::json!("COMPLETE")
        );
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn availability_requires_pending_unleased_and_due() {
        let j = job(JobStatus::Pending);
        assert!(j.is_available(j.available_at));
        assert!(!j.is_available(j.available_at - chrono::Duration::milliseconds(1)));

        let mut leased = j.clone();
        leased.worker_id = Some(WorkerId::new(3));
        assert!(!leased.is_available(j.available_at));

        assert!(!job(JobStatus::Running).is_available(j.available_at));
    }

    #[test]
    fn stuck_means_running_without_owner() {
        let mut j = job(JobStatus::Running);
        j.started = Some(j.available_at);
        assert!(j.is_stuck());

        j.worker_id = Some(WorkerId::new(1));
        assert!(!j.is_stuck());
    }

    #[test]
    fn trace_truncation_is_char_based() {
        let short = "a".repeat(10);
        assert_eq!(ErrorRecord::truncate_trace(&short), short);

        let long = "é".repeat(MAX_TRACE_CHARS + 5);
        let cut = ErrorRecord::truncate_trace(&long);
        assert_eq!(cut.chars().count(), MAX_TRACE_CHARS + 1);
        assert!(cut.ends_with(TRACE_ELLIPSIS));

        let exact = "x".repeat(MAX_TRACE_CHARS);
        assert_eq!(ErrorRecord::truncate_trace(&exact), exact);
    }

    #[test]
    fn error_record_serializes_kind_as_type() {
        let rec = ErrorRecord {
            kind: "TaskError".into(),
            message: "boom".into(),
            code: 0,
            file: None,
            line: None,
            trace: String::new(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["type"], "TaskError");
        assert!(v.get("file").is_none());
    }
}
