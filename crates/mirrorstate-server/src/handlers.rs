//! REST endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/states` | Frozen inventory of every named state |
//! | `GET` | `/api/states/{name}` | One named state with its sequence |
//! | `GET` | `/api/config` | Client configuration (`wsPath`) |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use mirrorstate_core::Medium;
use mirrorstate_types::StateName;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `GET /api/config`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    /// Path of the `WebSocket` endpoint.
    pub ws_path: String,
}

/// Every known state and the names' fingerprint.
pub async fn list_states<M: Medium>(State(state): State<Arc<AppState<M>>>) -> impl IntoResponse {
    Json(state.hub.freeze())
}

/// A single state by name. Names may contain `/`.
///
/// # Errors
///
/// Returns [`ApiError::InvalidName`] for an unusable name and
/// [`ApiError::NotFound`] if the hub has no such state.
pub async fn get_state<M: Medium>(
    State(state): State<Arc<AppState<M>>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let name = StateName::new(raw)?;
    let current = state
        .hub
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("state {name}")))?;
    Ok(Json(current))
}

/// Settings a client needs to find the socket.
pub async fn client_settings<M: Medium>(
    State(state): State<Arc<AppState<M>>>,
) -> impl IntoResponse {
    Json(ClientSettings {
        ws_path: state.ws_path.clone(),
    })
}
