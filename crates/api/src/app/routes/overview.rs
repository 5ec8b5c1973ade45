use axum::{Json, extract::Extension, response::IntoResponse};
use chrono::Duration;

use jobhouse_core::QueueResult;

use crate::app::{SharedManager, dto, errors};

/// Number of FAILED jobs listed on the overview.
const FAILED_LIMIT: u32 = 100;

pub async fn get_overview(Extension(manager): Extension<SharedManager>) -> axum::response::Response {
    match build_overview(&manager).await {
        Ok(overview) => Json(overview).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_workers(Extension(manager): Extension<SharedManager>) -> axum::response::Response {
    let now = manager.now();
    let stale_after = manager.config().stale_after();
    match manager.list_workers().await {
        Ok(workers) => Json(
            workers
                .iter()
                .map(|w| dto::WorkerView::new(w, now, stale_after))
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

async fn build_overview(manager: &SharedManager) -> QueueResult<dto::Overview> {
    let stats = manager.stats().await?;

    let mut queues = Vec::new();
    for queue in manager.known_queues().await? {
        let hour = manager.queue_stats(&queue, Duration::hours(1)).await?;
        let day = manager.timings(Some(queue.as_str()), Duration::hours(24)).await?;
        queues.push(dto::QueueView::new(&hour, &day));
    }

    let now = manager.now();
    let stale_after = manager.config().stale_after();
    let workers = manager
        .list_workers()
        .await?
        .iter()
        .map(|w| dto::WorkerView::new(w, now, stale_after))
        .collect();

    let failed = manager
        .list_failed_jobs(FAILED_LIMIT)
        .await?
        .iter()
        .map(dto::FailedJobView::from)
        .collect();

    Ok(dto::Overview {
        kpis: dto::kpis(&stats),
        queues,
        workers,
        failed,
    })
}
