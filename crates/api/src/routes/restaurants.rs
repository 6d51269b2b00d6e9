//! Restaurant-wide read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::RestaurantId;
use domain::{Order, SessionStatus, TableSession};
use serde::Deserialize;
use session_store::{Repository, SessionQuery};

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    /// Only sessions in this status. Open sessions when omitted.
    pub status: Option<SessionStatus>,
    pub limit: Option<usize>,
}

/// GET /restaurants/{id}/sessions: sessions of a restaurant.
#[tracing::instrument(skip(state))]
pub async fn list_sessions<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Query(params): Query<ListSessionsQuery>,
) -> Result<Json<Vec<TableSession>>, ApiError> {
    let restaurant_id: RestaurantId = parse_id("restaurant", &id)?;
    let mut query = match params.status {
        Some(status) => SessionQuery::for_restaurant(restaurant_id).status(status),
        None => SessionQuery::open_in(restaurant_id),
    };
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    let sessions = state.engine.lifecycle().list_sessions(query).await?;
    Ok(Json(sessions))
}

/// GET /restaurants/{id}/orders/active: kitchen dashboard, served from the view cache.
#[tracing::instrument(skip(state))]
pub async fn active_orders<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let restaurant_id: RestaurantId = parse_id("restaurant", &id)?;
    let orders = state.dashboards.active_orders(restaurant_id).await?;
    Ok(Json(orders))
}
