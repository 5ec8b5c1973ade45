use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use jobhouse_infra::store::JobFilter;

use crate::app::{SharedManager, dto, errors};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub async fn get_job(
    Extension(manager): Extension<SharedManager>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match manager.get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Job not found."),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// `GET /jobs?status=failed&queue=default&limit=50`, newest first.
pub async fn list_jobs(
    Extension(manager): Extension<SharedManager>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let status = match dto::parse_status(query.status.as_deref()) {
        Ok(status) => status,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    };
    let queue = match query.queue.as_deref().filter(|q| !q.is_empty()) {
        Some(q) => match manager.resolver().resolve_id(q) {
            Ok(id) => Some(id),
            Err(e) => return errors::queue_error_to_response(e),
        },
        None => None,
    };

    let filter = JobFilter {
        status,
        queue,
        newest_first: true,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)),
        ..Default::default()
    };

    match manager.find_jobs(&filter).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// Operator retry of a FAILED job.
pub async fn retry_job(
    Extension(manager): Extension<SharedManager>,
    body: Option<Json<dto::RetryRequest>>,
) -> axum::response::Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let Some(id) = request.job_id() else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "`job_id` is a required field.",
        );
    };

    match manager.retry_failed_job(id).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, "job queued for retry by operator");
            Json(job).into_response()
        }
        Err(e) => errors::queue_error_to_response(e),
    }
}
