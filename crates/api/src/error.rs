//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::{BlockedReason, EngineError};
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Engine error, mapped by kind.
    Engine(EngineError),
    /// Dashboard cache could not be filled.
    Projection(ProjectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Engine(err) => engine_error_to_response(err),
            ApiError::Projection(err) => {
                tracing::error!(error = %err, "view cache read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(err.to_string()))
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn engine_error_to_response(err: EngineError) -> (StatusCode, serde_json::Value) {
    match &err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, error_body(err.to_string())),
        EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, error_body(err.to_string())),
        EngineError::Conflict(_) => (StatusCode::CONFLICT, error_body(err.to_string())),
        EngineError::State { reason, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": err.to_string(),
                "reason": blocked_reason_body(reason),
            }),
        ),
        EngineError::ExternalService { .. } => {
            tracing::warn!(error = %err, "collaborator failed");
            (StatusCode::BAD_GATEWAY, error_body(err.to_string()))
        }
        EngineError::Timeout { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, error_body(err.to_string()))
        }
        EngineError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(err.to_string()))
        }
    }
}

fn blocked_reason_body(reason: &BlockedReason) -> serde_json::Value {
    match reason {
        BlockedReason::UnpaidBills { count } => {
            serde_json::json!({ "code": "unpaid_bills", "unpaid_bills": count })
        }
        BlockedReason::NoBills => serde_json::json!({ "code": "no_bills" }),
        BlockedReason::IllegalTransition { from, to } => {
            serde_json::json!({ "code": "illegal_transition", "from": from, "to": to })
        }
        BlockedReason::SessionClosed { status } => {
            serde_json::json!({ "code": "session_closed", "status": status })
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}

/// Parses a path segment into a typed id.
pub fn parse_id<T: std::str::FromStr>(kind: &str, raw: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} id '{raw}': {e}")))
}
