//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`WorkflowError`] variants to HTTP status codes and machine-readable
//! error codes so callers can branch on retry guidance: 409 means re-read
//! and retry, 503 means retry later, 422 means fix the request, and 502
//! with `AMBIGUOUS_UPSTREAM_FAILURE` means the resend will reuse the
//! retained idempotency key. Internal error details are never exposed in
//! responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use epa_workflow::WorkflowError;

/// Structured JSON error response body.
///
/// All error responses use this format across the API surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "INVALID_TRANSITION").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The state machine rejects the requested edge (409).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The record changed under the caller; re-read and retry (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An upstream integration is down or its breaker is open (503).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An upstream definitively refused the request (502).
    #[error("upstream rejected: {0}")]
    UpstreamRejected(String),

    /// An upstream submission timed out with unknown effect; the retained
    /// idempotency key makes the resend safe (502).
    #[error("ambiguous upstream failure: {0}")]
    AmbiguousUpstream(String),

    /// A required key or credential is missing (500). Details are logged
    /// but not returned to clients.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Internal server error (500). Message is logged but not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),
            Self::UpstreamUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "INTEGRATION_UNAVAILABLE")
            }
            Self::UpstreamRejected(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_REJECTED"),
            Self::AmbiguousUpstream(_) => {
                (StatusCode::BAD_GATEWAY, "AMBIGUOUS_UPSTREAM_FAILURE")
            }
            Self::NotConfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, "NOT_CONFIGURED"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::NotConfigured(_) => {
                "The server is not configured for this operation".to_string()
            }
            other => other.to_string(),
        };

        // Log 500-class errors for operator visibility.
        if matches!(&self, Self::Internal(_) | Self::NotConfigured(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound { id } => {
                Self::NotFound(format!("authorization {id} not found"))
            }
            WorkflowError::Validation(inner) => Self::Validation(inner.to_string()),
            WorkflowError::InvalidTransition(inner) => {
                Self::InvalidTransition(inner.to_string())
            }
            WorkflowError::ConcurrentModification { .. } => Self::Conflict(err.to_string()),
            WorkflowError::IntegrationUnavailable { .. } => {
                Self::UpstreamUnavailable(err.to_string())
            }
            WorkflowError::UpstreamRejected { .. } => Self::UpstreamRejected(err.to_string()),
            WorkflowError::AmbiguousUpstreamFailure { .. } => {
                Self::AmbiguousUpstream(err.to_string())
            }
            WorkflowError::NotConfigured { reason } => Self::NotConfigured(reason),
            WorkflowError::Storage { reason } => Self::Internal(reason),
        }
    }
}
