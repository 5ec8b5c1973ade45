//! Queue error model.

use thiserror::Error;

/// Result type used across the queue core and manager.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-level error.
///
/// Task failures are not represented here: a task that fails produces a
/// [`crate::TaskError`], which the worker loop turns into a retry or a terminal
/// failure. Everything below surfaces to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A queue identifier did not resolve to any alias or registered implementation.
    #[error("invalid queue \"{0}\"")]
    InvalidQueue(String),

    /// A task identifier is not registered.
    #[error("unknown task \"{0}\"")]
    UnknownTask(String),

    /// A request was rejected (e.g. retrying a job that has not failed).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A payload or error list could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage backend failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl QueueError {
    pub fn invalid_queue(id: impl Into<String>) -> Self {
        Self::InvalidQueue(id.into())
    }

    pub fn unknown_task(id: impl Into<String>) -> Self {
        Self::UnknownTask(id.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Persistence errors are transient from the worker loop's point of view.
    pub fn is_persistence(&self) -> bool {
        matches!(self, QueueError::Persistence(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
