//! # Authorization Lifecycle API
//!
//! The full REST surface over prior-authorization records, plus the SSE
//! stream of committed status changes.
//!
//! ## Endpoints
//!
//! - `POST /v1/authorizations` creates a draft record (201)
//! - `GET /v1/authorizations` lists records, optionally filtered by status
//! - `GET /v1/authorizations/pending` is the reviewer work queue
//! - `GET /v1/authorizations/stats` counts records per status
//! - `GET /v1/authorizations/{id}` fetches one record
//! - `POST /v1/authorizations/{id}/transition` runs a lifecycle transition
//! - `GET /v1/authorizations/{id}/history` returns the status-change ledger
//! - `GET /v1/authorizations/{id}/updates` streams updates over SSE
//!
//! ## SSE Contract
//!
//! The stream opens with one `snapshot` event carrying the current status,
//! then one `update` event per committed change. After a terminal status
//! is delivered the stream closes. A `?status=` filter suppresses
//! non-matching `update` events but the terminal close still applies.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use utoipa::ToSchema;
use uuid::Uuid;

use epa_core::{Authorization, AuthorizationId, AuthorizationStatus, StatusChange};
use epa_workflow::{NewAuthorization, TransitionRequest};

use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Default page size for the list endpoint.
const DEFAULT_LIMIT: i64 = 100;
/// Upper bound on the list page size.
const MAX_LIMIT: i64 = 1000;

// ── Request/Response DTOs ───────────────────────────────────────────

impl Validate for TransitionRequest {
    fn validate(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("reason must not be empty".to_string());
        }
        Ok(())
    }
}

/// Query parameters for the list endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<AuthorizationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for the SSE endpoint.
#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    pub status: Option<AuthorizationStatus>,
}

/// Record counts per lifecycle status.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
}

/// First SSE event on every stream: the status at subscription time.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub authorization_id: AuthorizationId,
    pub status: AuthorizationStatus,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the authorizations router with all lifecycle endpoints.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/authorizations",
            get(list_authorizations).post(create_authorization),
        )
        .route("/v1/authorizations/pending", get(pending_queue))
        .route("/v1/authorizations/stats", get(authorization_stats))
        .route("/v1/authorizations/{id}", get(get_authorization))
        .route(
            "/v1/authorizations/{id}/transition",
            post(request_transition),
        )
        .route("/v1/authorizations/{id}/history", get(status_history))
        .route("/v1/authorizations/{id}/updates", get(stream_updates))
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /v1/authorizations — Create a draft record.
#[utoipa::path(
    post,
    path = "/v1/authorizations",
    request_body = NewAuthorization,
    responses(
        (status = 201, description = "Authorization created", body = Authorization),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "authorizations"
)]
async fn create_authorization(
    State(state): State<AppState>,
    body: Result<Json<NewAuthorization>, JsonRejection>,
) -> Result<(StatusCode, Json<Authorization>), AppError> {
    let new = extract_json(body)?;
    let created = state.service.create_authorization(new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/authorizations — List records, newest first.
#[utoipa::path(
    get,
    path = "/v1/authorizations",
    params(
        ("status" = Option<AuthorizationStatus>, Query, description = "Only records in this status"),
        ("limit" = Option<i64>, Query, description = "Page size, clamped to 1000"),
        ("offset" = Option<i64>, Query, description = "Rows to skip"),
    ),
    responses(
        (status = 200, description = "Matching records", body = Vec<Authorization>),
    ),
    tag = "authorizations"
)]
async fn list_authorizations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Authorization>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    let records = state
        .service
        .list_authorizations(query.status, limit, offset)
        .await?;
    Ok(Json(records))
}

/// GET /v1/authorizations/pending — The reviewer work queue, oldest first.
#[utoipa::path(
    get,
    path = "/v1/authorizations/pending",
    responses(
        (status = 200, description = "Records awaiting action", body = Vec<Authorization>),
    ),
    tag = "authorizations"
)]
async fn pending_queue(
    State(state): State<AppState>,
) -> Result<Json<Vec<Authorization>>, AppError> {
    let records = state.service.pending_queue().await?;
    Ok(Json(records))
}

/// GET /v1/authorizations/stats — Record counts per status.
#[utoipa::path(
    get,
    path = "/v1/authorizations/stats",
    responses(
        (status = 200, description = "Counts per lifecycle status", body = StatsResponse),
    ),
    tag = "authorizations"
)]
async fn authorization_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, AppError> {
    let counts = state.service.stats().await?;
    let total = counts.values().sum();
    let by_status = counts
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count))
        .collect();
    Ok(Json(StatsResponse { total, by_status }))
}

/// GET /v1/authorizations/{id} — Fetch a single record.
#[utoipa::path(
    get,
    path = "/v1/authorizations/{id}",
    params(("id" = Uuid, Path, description = "Authorization ID")),
    responses(
        (status = 200, description = "Authorization found", body = Authorization),
        (status = 404, description = "Authorization not found", body = crate::error::ErrorBody),
    ),
    tag = "authorizations"
)]
async fn get_authorization(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Authorization>, AppError> {
    let id = AuthorizationId::from_uuid(id);
    let record = state.service.get_authorization(&id).await?;
    Ok(Json(record))
}

/// POST /v1/authorizations/{id}/transition — Run a lifecycle transition.
#[utoipa::path(
    post,
    path = "/v1/authorizations/{id}/transition",
    params(("id" = Uuid, Path, description = "Authorization ID")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transition committed", body = Authorization),
        (status = 404, description = "Authorization not found", body = crate::error::ErrorBody),
        (status = 409, description = "Edge not allowed, or the record changed concurrently", body = crate::error::ErrorBody),
        (status = 502, description = "An upstream rejected the request or failed ambiguously", body = crate::error::ErrorBody),
        (status = 503, description = "An upstream integration is unavailable", body = crate::error::ErrorBody),
    ),
    tag = "authorizations"
)]
async fn request_transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Authorization>, AppError> {
    let request = extract_validated_json(body)?;
    let id = AuthorizationId::from_uuid(id);
    let updated = state.service.request_transition(&id, request).await?;
    Ok(Json(updated))
}

/// GET /v1/authorizations/{id}/history — The status-change ledger.
#[utoipa::path(
    get,
    path = "/v1/authorizations/{id}/history",
    params(("id" = Uuid, Path, description = "Authorization ID")),
    responses(
        (status = 200, description = "Status changes, oldest first", body = Vec<StatusChange>),
        (status = 404, description = "Authorization not found", body = crate::error::ErrorBody),
    ),
    tag = "authorizations"
)]
async fn status_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StatusChange>>, AppError> {
    let id = AuthorizationId::from_uuid(id);
    let record = state.service.get_authorization(&id).await?;
    Ok(Json(record.audit.status_history))
}

/// GET /v1/authorizations/{id}/updates — SSE stream of status updates.
#[utoipa::path(
    get,
    path = "/v1/authorizations/{id}/updates",
    params(
        ("id" = Uuid, Path, description = "Authorization ID"),
        ("status" = Option<AuthorizationStatus>, Query, description = "Only deliver updates with this status"),
    ),
    responses(
        (status = 200, description = "text/event-stream of snapshot and update events"),
        (status = 404, description = "Authorization not found", body = crate::error::ErrorBody),
    ),
    tag = "authorizations"
)]
async fn stream_updates(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>, AppError> {
    let id = AuthorizationId::from_uuid(id);
    // Subscribe before the snapshot read so no committed change can fall
    // between the two.
    let mut updates = state.updates.subscribe();
    let record = state.service.get_authorization(&id).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    let wanted = query.status;
    tokio::spawn(async move {
        let snapshot = StatusSnapshot {
            authorization_id: id.clone(),
            status: record.status,
        };
        let Ok(event) = Event::default().event("snapshot").json_data(&snapshot) else {
            return;
        };
        if tx.send(Ok(event)).await.is_err() {
            return;
        }
        if record.status.is_terminal() {
            return;
        }
        loop {
            match updates.recv().await {
                Ok(update) if update.authorization_id == id => {
                    let terminal = update.is_terminal();
                    if wanted.map_or(true, |status| status == update.status) {
                        if let Ok(event) = Event::default().event("update").json_data(&update) {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if terminal {
                        return;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "update subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
