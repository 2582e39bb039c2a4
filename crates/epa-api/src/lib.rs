//! # epa-api — Axum REST & SSE Surface
//!
//! The HTTP layer over [`epa_workflow::WorkflowService`]: authorization
//! CRUD, lifecycle transitions, the reviewer work queue, per-status
//! counts, the status-change ledger, and a live SSE stream of committed
//! updates.
//!
//! ## API Surface
//!
//! | Prefix                  | Module                    |
//! |-------------------------|---------------------------|
//! | `/v1/authorizations/*`  | [`routes::authorizations`]|
//! | `/health/*`             | probes, this module       |
//! | `/openapi.json`         | [`openapi`]               |
//!
//! ## OpenAPI
//!
//! Auto-generated OpenAPI spec via utoipa derive macros at `/openapi.json`.

pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router.
///
/// Health probes are mounted alongside the API routes; the surface carries
/// no authentication layer, so nothing needs to be split out of it.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::authorizations::router())
        .merge(openapi::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new().merge(health).merge(api)
}

/// Liveness probe. Returns 200 whenever the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe. Returns 200 when the application can serve traffic.
async fn readiness() -> &'static str {
    "ready"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use epa_gateway::{MockInsuranceGateway, MockPharmacyGateway};
    use epa_workflow::{BroadcastPublisher, InMemoryAuthorizationStore, WorkflowService};

    use super::*;

    fn test_app() -> Router {
        let publisher = BroadcastPublisher::default();
        let service = WorkflowService::new(
            Arc::new(InMemoryAuthorizationStore::new()),
            Arc::new(MockInsuranceGateway::new()),
            Arc::new(MockPharmacyGateway::new()),
            Arc::new(publisher.clone()),
        );
        app(AppState::new(service, publisher))
    }

    #[tokio::test]
    async fn health_probes_answer_without_state() {
        let app = test_app();
        for path in ["/health/liveness", "/health/readiness"] {
            let resp = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
