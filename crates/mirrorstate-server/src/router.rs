//! Axum router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use mirrorstate_core::Medium;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router for a hub.
///
/// The router includes:
/// - `GET {ws_path}` -- `WebSocket` hub protocol
/// - `GET /api/states` -- frozen inventory
/// - `GET /api/states/{name}` -- single named state
/// - `GET /api/config` -- client settings
///
/// CORS allows any origin so development pages served elsewhere can
/// reach the hub.
pub fn build_router<M: Medium>(state: Arc<AppState<M>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&state.ws_path, get(ws::ws_handler::<M>))
        .route("/api/states", get(handlers::list_states::<M>))
        .route("/api/states/{*name}", get(handlers::get_state::<M>))
        .route("/api/config", get(handlers::client_settings::<M>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
