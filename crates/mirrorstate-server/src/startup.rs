//! One-call startup of hub, watcher, and HTTP server.
//!
//! [`spawn_server`] loads the file medium named by a [`HubConfig`],
//! starts the change watcher, binds the listener, and serves on a
//! background task. The returned [`RunningServer`] stops everything
//! when [`RunningServer::shutdown`] is called.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mirrorstate_core::HubConfig;
//! use mirrorstate_server::spawn_server;
//!
//! let running = spawn_server(&HubConfig::default()).await?;
//! tokio::signal::ctrl_c().await?;
//! running.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use mirrorstate_core::{FileMedium, Hub, HubConfig, HubError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::server::{ServerError, bind, serve_on};
use crate::state::AppState;

/// Errors that can occur while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The medium could not be loaded.
    #[error("hub start error: {0}")]
    Hub(#[from] HubError),

    /// The server failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// A hub server running on background tasks.
pub struct RunningServer {
    addr: SocketAddr,
    state: Arc<AppState<FileMedium>>,
    server: JoinHandle<Result<(), ServerError>>,
    watcher: JoinHandle<()>,
}

impl RunningServer {
    /// Address the listener is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The running hub.
    pub fn hub(&self) -> &Arc<Hub<FileMedium>> {
        &self.state.hub
    }

    /// Stop the watcher and the server and wait for both.
    ///
    /// # Errors
    ///
    /// Returns the server's error if it failed while serving.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        info!("Shutting down hub server");
        self.state.shutdown.cancel();

        if let Err(e) = self.watcher.await {
            error!(error = %e, "Watcher task panicked");
        }
        match self.server.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Serve(format!("server task failed: {e}"))),
        }
    }
}

/// Load the medium, start watching it, and serve on a background task.
///
/// Binds eagerly so a taken port is reported here rather than from the
/// background task.
///
/// # Errors
///
/// Returns [`StartupError`] if the medium cannot be loaded or the
/// address cannot be bound.
pub async fn spawn_server(config: &HubConfig) -> Result<RunningServer, StartupError> {
    let medium = Arc::new(FileMedium::from_config(config));
    let hub = Hub::open(medium, config.broadcast_capacity).await?;
    let state = Arc::new(AppState::new(hub, config.ws_path.clone()));

    let listener = bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let watcher = state
        .hub
        .spawn_watcher(config.poll_interval(), state.shutdown.child_token());
    let server = tokio::spawn(serve_on(listener, Arc::clone(&state)));

    info!(%addr, root = %config.root.display(), "Hub server spawned on background task");

    Ok(RunningServer {
        addr,
        state,
        server,
        watcher,
    })
}
