//! Error types for the client store.

use std::path::PathBuf;

/// Errors that can occur in the client store.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The state name is empty or reserved.
    #[error("invalid state name: {0}")]
    InvalidName(#[from] mirrorstate_types::NameError),

    /// A value did not match the handle's type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local snapshot could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The `WebSocket` connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The name has no live handle, so a change to it would go nowhere.
    #[error("no live handle for state {0}")]
    Unregistered(mirrorstate_types::StateName),
}

/// Errors from the local snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading, writing, or renaming the file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file exists but is not a JSON object.
    #[error("corrupt snapshot {}: {source}", .path.display())]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The document could not be serialized.
    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}
