//! Shared application state for the hub server.

use std::sync::Arc;

use mirrorstate_core::{Hub, Medium};
use tokio_util::sync::CancellationToken;

/// State shared by every route.
pub struct AppState<M> {
    /// The hub all sockets attach to.
    pub hub: Arc<Hub<M>>,
    /// Path the `WebSocket` endpoint is mounted on.
    pub ws_path: String,
    /// Fired when the server shuts down; open sockets close on it.
    pub shutdown: CancellationToken,
}

impl<M: Medium> AppState<M> {
    /// Wrap a hub, mounting the socket at `ws_path`.
    pub fn new(hub: Arc<Hub<M>>, ws_path: impl Into<String>) -> Self {
        let mut ws_path = ws_path.into();
        if !ws_path.starts_with('/') {
            ws_path.insert(0, '/');
        }
        Self {
            hub,
            ws_path,
            shutdown: CancellationToken::new(),
        }
    }
}
