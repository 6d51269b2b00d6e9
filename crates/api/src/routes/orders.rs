//! Order intake and kitchen status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, OrderId, SessionId};
use domain::{Order, OrderStatus};
use engine::OrderLineRequest;
use serde::Deserialize;
use session_store::Repository;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: CustomerId,
    pub items: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceItemsRequest {
    pub items: Vec<OrderLineRequest>,
}

// -- Handlers --

/// POST /sessions/{id}/orders: place an order for a diner.
#[tracing::instrument(skip(state, req))]
pub async fn place<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let order = state
        .engine
        .orders()
        .place_order(session_id, req.customer_id, req.items)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /sessions/{id}/orders: every order of a session.
#[tracing::instrument(skip(state))]
pub async fn list_for_session<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let session_id: SessionId = parse_id("session", &id)?;
    let orders = state.engine.orders().orders_for_session(session_id).await?;
    Ok(Json(orders))
}

/// PUT /orders/{id}/status: advance an order through the kitchen.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_status<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let order = state
        .engine
        .orders()
        .update_order_status(order_id, req.status)
        .await?;
    Ok(Json(order))
}

/// PUT /orders/{id}/items: replace the lines of a pending order.
#[tracing::instrument(skip(state, req))]
pub async fn replace_items<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Json(req): Json<ReplaceItemsRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let order = state
        .engine
        .orders()
        .replace_items(order_id, req.items)
        .await?;
    Ok(Json(order))
}

/// DELETE /orders/{id}: remove a pending order.
#[tracing::instrument(skip(state))]
pub async fn delete<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    state.engine.orders().delete_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
