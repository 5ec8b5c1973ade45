//! Configuration loading from the environment.
//!
//! `QueueConfig` reads `QUEUE_*` variables, `AppConfig` the process-level
//! ones (`DATABASE_URL`, `JOBHOUSE_BIND`, ...). Missing variables fall back to
//! defaults; `.env` loading is left to the binary.

use std::time::Duration;

use serde::Deserialize;

use jobhouse_core::Backoff;

/// Error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Queue tuning knobs, read from `QUEUE_*`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Seconds without heartbeat before a worker counts as stale.
    pub worker_heartbeat_stale: u64,
    /// Minimum seconds between heartbeat writes.
    pub worker_heartbeat_debounce: u64,
    /// Idle poll sleep, milliseconds.
    pub worker_wait_time: u64,
    /// Upper bound of the random extra idle sleep, milliseconds.
    pub worker_wait_jitter: u64,
    /// Seconds between queue refresh hooks.
    pub worker_refresh_interval: u64,
    /// Retention for COMPLETE jobs in days; 0 disables.
    pub job_rotate_complete_days: u32,
    /// Retention for FAILED jobs in days; 0 disables.
    pub job_rotate_failed_days: u32,
    pub backoff_base: u64,
    pub backoff_cap: u64,
    pub backoff_jitter: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_heartbeat_stale: 300,
            worker_heartbeat_debounce: 5,
            worker_wait_time: 500,
            worker_wait_jitter: 200,
            worker_refresh_interval: 300,
            job_rotate_complete_days: 7,
            job_rotate_failed_days: 30,
            backoff_base: 5,
            backoff_cap: 300,
            backoff_jitter: 0.2,
        }
    }
}

/// Longest retention window accepted, in days.
pub const MAX_ROTATE_DAYS: u32 = 36_500;

/// Longest duration accepted for second-valued knobs (ten years).
pub const MAX_SECS: u64 = 10 * 365 * 24 * 60 * 60;

impl QueueConfig {
    pub const PREFIX: &'static str = "QUEUE_";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(Self::PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let secs = [
            ("QUEUE_WORKER_HEARTBEAT_STALE", self.worker_heartbeat_stale),
            ("QUEUE_WORKER_HEARTBEAT_DEBOUNCE", self.worker_heartbeat_debounce),
            ("QUEUE_WORKER_REFRESH_INTERVAL", self.worker_refresh_interval),
            ("QUEUE_BACKOFF_BASE", self.backoff_base),
            ("QUEUE_BACKOFF_CAP", self.backoff_cap),
        ];
        for (name, value) in secs {
            if value > MAX_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} ({value}) must be <= {MAX_SECS} seconds"
                )));
            }
        }
        let days = [
            ("QUEUE_JOB_ROTATE_COMPLETE_DAYS", self.job_rotate_complete_days),
            ("QUEUE_JOB_ROTATE_FAILED_DAYS", self.job_rotate_failed_days),
        ];
        for (name, value) in days {
            if value > MAX_ROTATE_DAYS {
                return Err(ConfigError::Invalid(format!(
                    "{name} ({value}) must be <= {MAX_ROTATE_DAYS} days"
                )));
            }
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::Invalid(format!(
                "QUEUE_BACKOFF_CAP ({}) must be >= QUEUE_BACKOFF_BASE ({})",
                self.backoff_cap, self.backoff_base
            )));
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Invalid(format!(
                "QUEUE_BACKOFF_JITTER must be in [0, 1), got {}",
                self.backoff_jitter
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap, self.backoff_jitter)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        signed_secs(self.worker_heartbeat_stale)
    }

    pub fn heartbeat_debounce(&self) -> chrono::Duration {
        signed_secs(self.worker_heartbeat_debounce)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.worker_wait_time)
    }

    pub fn wait_jitter(&self) -> Duration {
        Duration::from_millis(self.worker_wait_jitter)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.worker_refresh_interval)
    }
}

/// Saturates at `TimeDelta::MAX` for values chrono cannot represent.
fn signed_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Process-level settings for the binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string; the in-memory store is used when absent.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_bind")]
    pub jobhouse_bind: String,
    /// Bearer token required by the HTTP API, when set.
    #[serde(default)]
    pub jobhouse_api_token: Option<String>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        if config.database_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "DATABASE_MAX_CONNECTIONS must be positive".into(),
            ));
        }
        Ok(config)
    }
}
