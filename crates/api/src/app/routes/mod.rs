use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod overview;
pub mod system;

/// Router for every endpoint behind the optional bearer token.
pub fn router() -> Router {
    Router::new()
        .route("/overview", get(overview::get_overview))
        .route("/workers", get(overview::list_workers))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/retry", post(jobs::retry_job))
}
