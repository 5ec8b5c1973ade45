use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobhouse_core::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        QueueError::InvalidQueue(queue) => json_error(
            StatusCode::BAD_REQUEST,
            "invalid_queue",
            format!("unknown queue: {queue}"),
        ),
        QueueError::UnknownTask(task) => json_error(
            StatusCode::BAD_REQUEST,
            "unknown_task",
            format!("unknown task: {task}"),
        ),
        QueueError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        QueueError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
        QueueError::Persistence(msg) => {
            tracing::error!(error = %msg, "storage failure while serving request");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_job_id(raw: &str) -> Result<jobhouse_core::JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_job_id", "job id must be an integer"))
}
