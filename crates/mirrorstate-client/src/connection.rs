//! Reconnecting `WebSocket` loop between a [`ClientStore`] and the hub.
//!
//! Each session attaches an outbound channel to the store, forwards what
//! the store sends, and feeds inbound frames back into it. When the
//! socket drops, the store is detached and anything not yet written goes
//! back to the offline queue, and the loop retries after the configured
//! delay until the store shuts down.

use futures::{SinkExt, StreamExt};
use mirrorstate_types::ClientMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::Mode;
use crate::error::ClientError;
use crate::store::ClientStore;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the connection loop for a live store.
///
/// Returns `None` in production mode, where there is no hub to reach.
/// The loop ends when [`ClientStore::shutdown`] is called.
pub fn spawn_connection(store: &ClientStore) -> Option<JoinHandle<()>> {
    if store.config().mode == Mode::Production {
        info!("Production mode, no hub connection");
        return None;
    }
    Some(tokio::spawn(run(store.clone())))
}

async fn run(store: ClientStore) {
    let cancel = store.cancellation();
    let url = store.config().url.clone();
    let delay = store.config().reconnect_delay();

    loop {
        let connected = tokio::select! {
            () = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((socket, _)) => {
                info!(%url, "Connected to hub");
                if let Err(e) = session(&store, socket).await {
                    warn!(error = %e, "Hub session ended with error");
                }
            }
            Err(e) => debug!(%url, error = %e, "Hub unreachable"),
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Connection loop stopped");
}

async fn session(store: &ClientStore, socket: Socket) -> Result<(), ClientError> {
    let cancel = store.cancellation();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    store.attach(tx);

    let mut failed = None;
    let result = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                break Ok(());
            }
            Some(msg) = rx.recv() => {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(name = %msg.name, error = %e, "Failed to serialize client message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    failed = Some(msg);
                    break Err(ClientError::Connection(e.to_string()));
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => store.handle_text(&text),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Hub closed the connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ClientError::Connection(e.to_string())),
            },
        }
    };

    store.detach(failed, &mut rx);
    result
}
