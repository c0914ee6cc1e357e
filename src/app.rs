use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{api, auth, auth::AuthConfig, state::AppState, ws};

/// Build the HTTP router
pub fn router(state: Arc<AppState>, auth_config: Arc<AuthConfig>) -> Router {
    // Protected stage routes (with HTTP Basic Auth)
    let stage_routes = Router::new()
        .route("/ws/stage", get(ws::stage_ws_handler))
        .route("/api/state/export", get(api::export_state))
        .route("/api/state/import", post(api::import_state))
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::stage_auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/show", get(api::show));

    Router::new()
        .merge(stage_routes)
        .merge(public_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
