//! HTTP API application wiring (Axum router + manager handle).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use jobhouse_infra::Manager;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Manager handle shared by all handlers.
pub type SharedManager = Arc<Manager>;

/// Build the full HTTP router.
///
/// With `api_token` set every route except `/health` requires
/// `Authorization: Bearer <token>`.
pub fn build_app(manager: SharedManager, api_token: Option<String>) -> Router {
    let mut protected = routes::router().layer(Extension(manager));

    if let Some(token) = api_token.filter(|t| !t.is_empty()) {
        protected = protected.layer(axum::middleware::from_fn_with_state(
            middleware::AuthState::new(token),
            middleware::auth_middleware,
        ));
    }

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use jobhouse_infra::{InMemoryQueueStore, QueueConfig, QueueStore};
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> Router {
        let store: Arc<dyn QueueStore> = InMemoryQueueStore::arc();
        let manager = Arc::new(Manager::new(store, QueueConfig::default()));
        build_app(manager, token.map(str::to_string))
    }

    async fn status(app: Router, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_stays_public_when_a_token_is_set() {
        assert_eq!(status(app(Some("s3cret")), "/health", None).await, StatusCode::OK);
        assert_eq!(
            status(app(Some("s3cret")), "/workers", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(app(Some("s3cret")), "/workers", Some("s3cret")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn empty_token_leaves_routes_open() {
        assert_eq!(status(app(Some("")), "/workers", None).await, StatusCode::OK);
        assert_eq!(status(app(None), "/nowhere", None).await, StatusCode::NOT_FOUND);
    }
}
