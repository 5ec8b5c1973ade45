//! HTTP read API over the queue manager: overview metrics, job lookup and
//! the operator retry trigger.

pub mod app;
pub mod middleware;

pub use app::{SharedManager, build_app};
