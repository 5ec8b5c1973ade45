//! Task interface, task failures and the task registry.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{QueueError, QueueResult};
use crate::job::ErrorRecord;

/// Identifier of the built-in no-op task.
pub const DO_NOTHING: &str = "jobhouse.do_nothing";

/// A unit of executable work, supplied by the application.
#[async_trait]
pub trait Task: Send + Sync {
    /// How many retries a failing job of this task gets before it is marked FAILED.
    fn max_retries(&self) -> u32;

    async fn run(&self, data: &serde_json::Value) -> Result<(), TaskError>;
}

/// Failure raised by a task run.
///
/// Never escapes the worker loop: it is converted into an [`ErrorRecord`] and
/// drives the retry / terminal failure transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
    pub code: i64,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub trace: String,
}

impl TaskError {
    /// New error located at the caller.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = Location::caller();
        Self {
            kind: "TaskError".to_string(),
            message: message.into(),
            code: 0,
            file: Some(loc.file().to_string()),
            line: Some(loc.line()),
            trace: String::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// Task identifier has no registered implementation in this process.
    #[track_caller]
    pub fn unknown_task(task: &str) -> Self {
        Self::new(QueueError::unknown_task(task).to_string()).with_kind("UnknownTask")
    }

    /// Convert a caught panic payload.
    #[track_caller]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self::new(message).with_kind("Panic")
    }

    /// Structured record appended to the job's error list.
    pub fn to_record(&self, at: DateTime<Utc>) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind.clone(),
            message: self.message.clone(),
            code: self.code,
            file: self.file.clone(),
            line: self.line,
            trace: ErrorRecord::truncate_trace(&self.trace),
            occurred_at: at,
        }
    }
}

impl core::fmt::Display for TaskError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
            .with_kind("Error")
            .with_trace(format!("{err:?}"))
    }
}

impl From<serde_json::Error> for TaskError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_kind("Serialization")
    }
}

/// No-op task.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoNothing;

#[async_trait]
impl Task for DoNothing {
    fn max_retries(&self) -> u32 {
        0
    }

    async fn run(&self, _data: &serde_json::Value) -> Result<(), TaskError> {
        Ok(())
    }
}

type TaskFactory = Arc<dyn Fn() -> Arc<dyn Task> + Send + Sync>;

/// Maps stable task identifiers to factories.
///
/// Jobs persist only the identifier; the executing worker looks it up here.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with [`DoNothing`].
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register_default::<DoNothing>(DO_NOTHING);
        reg
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Task> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn register_default<T>(&mut self, id: impl Into<String>) -> &mut Self
    where
        T: Task + Default + 'static,
    {
        self.register(id, || Arc::new(T::default()) as Arc<dyn Task>)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, id: &str) -> QueueResult<Arc<dyn Task>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| QueueError::unknown_task(id))
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
