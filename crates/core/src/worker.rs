//! Worker record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::WorkerId;

/// Default heartbeat age after which a worker is presumed dead.
pub const DEFAULT_STALE_SECONDS: i64 = 300;

/// A live (or not yet reclaimed) worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    /// `host:pid:suffix`
    pub token: String,
    /// Resolved queue identifiers, in polling order
    pub queues: Vec<String>,
    pub heartbeat: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Worker {
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.heartbeat
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.heartbeat_age(now) > stale_after
    }
}

impl Entity for Worker {
    type Id = WorkerId;

    fn id(&self) -> WorkerId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorker {
    pub token: String,
    pub queues: Vec<String>,
    pub heartbeat: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn staleness_uses_strict_threshold() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut w = Worker {
            id: WorkerId::new(1),
            token: "host:1:abcd".into(),
            queues: vec!["jobhouse.default".into()],
            heartbeat: now - Duration::seconds(DEFAULT_STALE_SECONDS),
            created: now,
            modified: now,
        };
        let threshold = Duration::seconds(DEFAULT_STALE_SECONDS);
        assert!(!w.is_stale(now, threshold));

        w.heartbeat = now - Duration::seconds(DEFAULT_STALE_SECONDS + 1);
        assert!(w.is_stale(now, threshold));
    }
}
