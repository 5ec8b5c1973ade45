//! Infrastructure layer: storage backends, configuration, the queue manager
//! and the worker loop.

pub mod config;
pub mod manager;
pub mod store;
pub mod worker;


pub use config::{AppConfig, ConfigError, QueueConfig};
pub use manager::{FailureOutcome, Manager};
pub use store::{
    InMemoryQueueStore, JobFilter, JobPatch, JobStore, JobTimings, PostgresQueueStore,
    QueueStore, SCHEMA, StoreError, WorkerStore,
};
pub use worker::{WorkerLoop, WorkerReport};
