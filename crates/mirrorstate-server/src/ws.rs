//! `WebSocket` handler speaking the hub protocol.
//!
//! Each socket is bound to one [`Connection`]. On open the client
//! receives an `initialState` frame per known name; afterwards inbound
//! text frames are handed to the connection and its replies and pushes
//! are written back as JSON text frames.
//!
//! Malformed inbound frames are logged and ignored without closing the
//! socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use mirrorstate_core::{Connection, Medium};
use mirrorstate_types::ServerMessage;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request into a hub connection.
///
/// # Route
///
/// `GET {ws_path}`
pub async fn ws_handler<M: Medium>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<M>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize server message: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|e| {
        debug!("WebSocket client disconnected (send failed: {e})");
    })
}

async fn send_all(socket: &mut WebSocket, msgs: Vec<ServerMessage>) -> Result<(), ()> {
    for msg in msgs {
        send(socket, &msg).await?;
    }
    Ok(())
}

/// Run one socket until either side closes or the server shuts down.
async fn handle_ws<M: Medium>(mut socket: WebSocket, state: Arc<AppState<M>>) {
    let mut conn = state.hub.connect();
    debug!(connection = %conn.id(), "WebSocket client connected");

    let initial = conn.open();
    if send_all(&mut socket, initial).await.is_ok() {
        pump(&mut socket, &mut conn, &state).await;
    }

    conn.close();
}

async fn pump<M: Medium>(socket: &mut WebSocket, conn: &mut Connection<M>, state: &AppState<M>) {
    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!("Server shutting down, closing WebSocket");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            outbound = conn.next_message() => {
                let Some(msg) = outbound else {
                    debug!("Hub closed, shutting down WebSocket");
                    return;
                };
                if send(socket, &msg).await.is_err() {
                    return;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let replies = conn.handle_text(text.as_str()).await;
                        if send_all(socket, replies).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %conn.id(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
