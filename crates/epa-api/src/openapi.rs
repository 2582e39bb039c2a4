//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ePA Stack API",
        version = "0.1.0",
        description = "Electronic prior-authorization workflow: authorization lifecycle management, payer and pharmacy integrations, and live status updates.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        crate::routes::authorizations::create_authorization,
        crate::routes::authorizations::list_authorizations,
        crate::routes::authorizations::pending_queue,
        crate::routes::authorizations::authorization_stats,
        crate::routes::authorizations::get_authorization,
        crate::routes::authorizations::request_transition,
        crate::routes::authorizations::status_history,
        crate::routes::authorizations::stream_updates,
    ),
    components(schemas(
        // Domain types
        epa_core::Authorization,
        epa_core::AuthorizationStatus,
        epa_core::PatientInfo,
        epa_core::InsuranceInfo,
        epa_core::MedicationInfo,
        epa_core::ClinicalInfo,
        epa_core::CoverageSummary,
        epa_core::DocumentReference,
        epa_core::AuditBlock,
        epa_core::StatusChange,
        epa_core::WorkflowEvent,
        // Workflow DTOs
        epa_workflow::NewAuthorization,
        epa_workflow::TransitionRequest,
        epa_workflow::StatusUpdateEvent,
        // Route DTOs
        crate::routes::authorizations::StatsResponse,
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "authorizations", description = "Prior-authorization lifecycle API"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
