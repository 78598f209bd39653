//! Error types for the `mirrorstate` binary.
//!
//! [`AppError`] wraps every failure a subcommand can hit so `main` can
//! propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: mirrorstate_core::ConfigError,
    },

    /// The medium could not be read.
    #[error("medium error: {source}")]
    Medium {
        /// The underlying medium error.
        #[from]
        source: mirrorstate_core::MediumError,
    },

    /// The server failed to start.
    #[error("startup error: {source}")]
    Startup {
        /// The underlying startup error.
        #[from]
        source: mirrorstate_server::StartupError,
    },

    /// The server failed while running.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: mirrorstate_server::ServerError,
    },

    /// Output could not be serialized.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// Writing output or waiting for a signal failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File or resource involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
