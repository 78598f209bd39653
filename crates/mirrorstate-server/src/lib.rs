//! HTTP and `WebSocket` front end for the `MirrorState` hub.
//!
//! This crate wraps a [`Hub`](mirrorstate_core::Hub) in an Axum server
//! that exposes:
//!
//! - **`WebSocket` endpoint** (default `/mirrorstate`) speaking the hub
//!   protocol: `initialState` on open, `update` / `fileChange` pushes,
//!   and `writeFailed` replies
//! - **REST endpoints** for reading the current inventory, a single
//!   named state, and the client configuration
//!
//! # Architecture
//!
//! Every socket gets its own [`Connection`](mirrorstate_core::Connection)
//! and runs a single `select!` loop over inbound frames, outbound hub
//! messages, and server shutdown. All sequencing and persistence happens
//! inside the hub; this crate only moves frames.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

pub use router::build_router;
pub use server::{ServerError, bind, serve_on};
pub use startup::{RunningServer, StartupError, spawn_server};
pub use state::AppState;
