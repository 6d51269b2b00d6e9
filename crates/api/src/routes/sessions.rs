//! Session lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, RestaurantId, SessionId, TableId};
use domain::{Customer, NewCustomer, NewSession, SessionStatus, SessionSummary, SplitType, TableSession};
use serde::{Deserialize, Serialize};
use session_store::Repository;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
    pub party_size: u32,
    #[serde(default)]
    pub split_type: SplitType,
    #[serde(default)]
    pub session_name: Option<String>,
    /// Seated as numbered guests when empty.
    #[serde(default)]
    pub customers: Vec<NewCustomer>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub status: SessionStatus,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaiterRequest {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

// -- Response types --

#[derive(Serialize)]
pub struct WaiterResponse {
    pub session_id: SessionId,
    pub status: &'static str,
}

// -- Handlers --

/// POST /sessions: seat a party at a table.
#[tracing::instrument(skip(state, req), fields(table_id = %req.table_id))]
pub async fn create<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let input = NewSession {
        restaurant_id: req.restaurant_id,
        table_id: req.table_id,
        party_size: req.party_size,
        split_type: req.split_type,
        session_name: req.session_name,
    };
    let summary = state
        .engine
        .lifecycle()
        .start_session(input, req.customers)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /sessions/{id}: session with diners and derived totals.
#[tracing::instrument(skip(state))]
pub async fn get<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let summary = state.engine.lifecycle().summary(session_id).await?;
    Ok(Json(summary))
}

/// PUT /sessions/{id}: request a status change through the lifecycle guards.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<TableSession>, ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let session = state
        .engine
        .lifecycle()
        .set_status(session_id, req.status, req.force)
        .await?;
    Ok(Json(session))
}

/// POST /sessions/{id}/customers: seat one more diner.
#[tracing::instrument(skip(state, req))]
pub async fn add_customer<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let customer = state
        .engine
        .lifecycle()
        .add_customer(session_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

/// POST /sessions/{id}/waiter: call a waiter to the table.
#[tracing::instrument(skip(state, req))]
pub async fn call_waiter<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    req: Option<Json<WaiterRequest>>,
) -> Result<(StatusCode, Json<WaiterResponse>), ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let Json(req) = req.unwrap_or_default();
    state
        .engine
        .lifecycle()
        .request_waiter(session_id, req.customer_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WaiterResponse {
            session_id,
            status: "requested",
        }),
    ))
}
