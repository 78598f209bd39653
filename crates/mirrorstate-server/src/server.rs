//! HTTP server lifecycle management.
//!
//! [`bind`] binds the configured address; [`serve_on`] runs the router on
//! an already bound listener until the state's shutdown token fires,
//! closing open sockets on the way out.

use std::net::SocketAddr;
use std::sync::Arc;

use mirrorstate_core::{HubConfig, Medium};
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Bind the address from `config`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken.
pub async fn bind(config: &HubConfig) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve the router on `listener` until `state.shutdown` is cancelled.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve_on<M: Medium>(
    listener: TcpListener,
    state: Arc<AppState<M>>,
) -> Result<(), ServerError> {
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    info!(%addr, "Hub server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    info!(%addr, "Hub server stopped");
    Ok(())
}
