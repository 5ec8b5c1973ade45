//! `jobhouse-core`: queue domain building blocks.
//!
//! Pure domain types (no I/O): job and worker records, the task and queue
//! interfaces with their registries, the backoff policy and a clock seam.

pub mod backoff;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod job;
pub mod queue;
pub mod task;
pub mod worker;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{Entity, dedup_by_id};
pub use error::{QueueError, QueueResult};
pub use id::{JobId, WorkerId};
pub use job::{ErrorRecord, Job, JobStatus, NewJob};
pub use queue::{BasicQueue, DEFAULT_QUEUE, PRIORITY_QUEUE, Queue, QueueRef, QueueResolver};
pub use task::{DO_NOTHING, DoNothing, Task, TaskError, TaskRegistry};
pub use worker::{NewWorker, Worker};
