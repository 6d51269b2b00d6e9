//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use session_store::Repository;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Restaurants with a live dashboard cache.
    pub dashboards: usize,
}

/// GET /health: liveness plus dashboard count.
pub async fn check<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        dashboards: state.dashboards.len(),
    })
}
