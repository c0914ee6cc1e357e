//! HTTP API endpoints.
//!
//! `/api/show` is public; the snapshot endpoints are mounted behind stage auth.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::state::AppState;
use crate::store::snapshot::StoreSnapshot;

/// The derived show view, for screens that poll instead of subscribing.
///
/// GET /api/show
pub async fn show(State(state): State<Arc<AppState>>) -> Response {
    match state.show_state().await {
        Ok(show) => Json(show.view).into_response(),
        Err(e) => {
            tracing::error!("Failed to read show state: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Export the whole store as JSON.
///
/// GET /api/state/export
pub async fn export_state(State(state): State<Arc<AppState>>) -> Response {
    match state.export_state().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            tracing::error!("State export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e)).into_response()
        }
    }
}

/// Import a store snapshot.
///
/// POST /api/state/import
///
/// Replaces every record except the controller lease. Subscribers see one
/// wholesale change and the controller re-derives its timers from it.
pub async fn import_state(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<StoreSnapshot>,
) -> Response {
    match state.import_state(snapshot).await {
        Ok(()) => (StatusCode::OK, "State imported successfully").into_response(),
        Err(e) => {
            tracing::error!("State import failed: {}", e);
            (StatusCode::BAD_REQUEST, format!("Import failed: {}", e)).into_response()
        }
    }
}
