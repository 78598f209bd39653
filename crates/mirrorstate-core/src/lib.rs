//! Server-side engine for the `MirrorState` sync engine.
//!
//! The [`Hub`](hub::Hub) owns the authoritative per-name sequence and the
//! backing medium. Connections submit whole-value mutations; the hub
//! sequences them, persists them, and fans them out. External edits to
//! the medium are picked up by the [`ChangeWatcher`](watcher::ChangeWatcher),
//! run through the echo filter, and fanned out to every connection.
//!
//! # Data flow
//!
//! ```text
//! client mutation --> Connection --> Hub --(per-name lock)--> Sequencer
//!                                      |                        |
//!                                      +--> Medium::write ------+--> broadcast
//!
//! external edit --> Medium --> ChangeWatcher --> Hub --> echo filter --> broadcast
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML hub configuration with env overrides
//! - [`store`] -- In-memory value cache with ordered subscriptions
//! - [`medium`] -- Durable representation of named states
//! - [`watcher`] -- Polling change detection on the medium
//! - [`sequencer`] -- Per-name sequence numbers and echo suppression
//! - [`hub`] -- Connection handling and fan-out
//! - [`inventory`] -- Build-time enumeration and freezing

pub mod config;
pub mod hub;
pub mod inventory;
pub mod medium;
pub mod sequencer;
pub mod store;
pub mod watcher;

pub use config::{ConfigError, HubConfig};
pub use hub::{Connection, ConnectionState, Hub, HubError, SubmitOutcome};
pub use medium::{FileMedium, Medium, MediumError, MemoryMedium};
pub use sequencer::{Observation, SequenceSlot, Sequencer};
pub use store::{StateStore, Subscription};
pub use watcher::{Baseline, ChangeEvent, ChangeWatcher};
