//! Bill generation and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{BillId, SessionId};
use domain::{Bill, SplitPolicy};
use engine::Reconciliation;
use serde::{Deserialize, Serialize};
use session_store::Repository;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct GenerateBillsRequest {
    pub policy: SplitPolicy,
}

#[derive(Debug, Deserialize)]
pub struct PayBillRequest {
    pub payment_method: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct GenerateBillsResponse {
    /// Every bill answering the request, previously generated ones first.
    pub bills: Vec<Bill>,
    /// How many of `bills` this call created.
    pub created: usize,
    pub reconciliation: Reconciliation,
}

// -- Handlers --

/// POST /sessions/{id}/bills: split the session into bills. Idempotent.
#[tracing::instrument(skip(state, req), fields(policy = req.policy.name()))]
pub async fn generate<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<GenerateBillsRequest>,
) -> Result<(StatusCode, Json<GenerateBillsResponse>), ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let outcome = state
        .engine
        .settlement()
        .generate_bills(session_id, req.policy)
        .await?;

    let status = if outcome.created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let response = GenerateBillsResponse {
        bills: outcome.bills(),
        created: outcome.created.len(),
        reconciliation: outcome.reconciliation,
    };
    Ok((status, Json(response)))
}

/// GET /sessions/{id}/bills: every bill of a session.
#[tracing::instrument(skip(state))]
pub async fn list_for_session<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Bill>>, ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let bills = state
        .engine
        .settlement()
        .bills_for_session(session_id)
        .await?;
    Ok(Json(bills))
}

/// PUT /bills/{id}/pay: capture payment and mark the bill paid.
#[tracing::instrument(skip(state, req))]
pub async fn pay<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<PayBillRequest>,
) -> Result<Json<Bill>, ApiError> {
    let bill_id: BillId = parse_id("bill", &id)?;
    let bill = state
        .engine
        .settlement()
        .mark_bill_paid(bill_id, &req.payment_method)
        .await?;
    Ok(Json(bill))
}

/// PUT /bills/{id}/cancel: cancel a pending bill.
#[tracing::instrument(skip(state))]
pub async fn cancel<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<Bill>, ApiError> {
    let bill_id: BillId = parse_id("bill", &id)?;
    let bill = state.engine.settlement().cancel_bill(bill_id).await?;
    Ok(Json(bill))
}
