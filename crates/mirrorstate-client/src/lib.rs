//! Client side of the `MirrorState` sync engine.
//!
//! A [`ClientStore`] presents every named state as a typed
//! [`StateHandle`] with `get`, `mutate`, and `subscribe`. Local
//! mutations are applied optimistically, batched per scheduler turn,
//! debounced, and sent to the hub over a `WebSocket` maintained by
//! [`spawn_connection`]. Inbound values are reconciled by sequence so
//! duplicates and stale deliveries are ignored.
//!
//! In [`Mode::Production`] there is no hub. Values start from the
//! build's [`FrozenInventory`](mirrorstate_types::FrozenInventory) and
//! local changes persist to a [`LocalSnapshot`] tagged with the build
//! fingerprint.
//!
//! # Modules
//!
//! - [`config`] -- Client configuration from environment variables
//! - [`store`] -- Batching, debounce, offline queue, reconciliation
//! - [`handle`] -- Typed per-name handles
//! - [`persistence`] -- Fingerprinted local snapshot file
//! - [`connection`] -- Reconnecting `WebSocket` loop
//! - [`error`] -- Client error types

pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod persistence;
pub mod store;

pub use config::{ClientConfig, Mode};
pub use connection::spawn_connection;
pub use error::{ClientError, PersistenceError};
pub use handle::{StateHandle, TypedSubscription};
pub use persistence::LocalSnapshot;
pub use store::{ClientEvent, ClientStore, Updater};
