//! Configuration loading and typed config structures for the hub.
//!
//! The hub reads `mirrorstate.yaml` from the working directory when it
//! exists. Every field has a default, so an empty or missing file yields
//! a working development setup watching `**/*.mirror.json` below the
//! current directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unusable value.
    #[error("invalid environment override {var}: {message}")]
    Env {
        /// The offending variable.
        var: &'static str,
        /// Why it was rejected.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Hub configuration.
///
/// Mirrors the structure of `mirrorstate.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Directory whose mirror files make up the medium.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// File suffix identifying mirror files.
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    /// Directory names never descended into.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Write files with two-space indentation.
    #[serde(default = "default_true")]
    pub pretty_print: bool,

    /// HTTP path of the `WebSocket` endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How often the change watcher scans the medium.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the fan-out channel before slow connections resync.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            file_suffix: default_file_suffix(),
            ignore: default_ignore(),
            pretty_print: true,
            ws_path: default_ws_path(),
            host: default_host(),
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `MIRRORSTATE_ROOT` overrides `root`
    /// - `MIRRORSTATE_HOST` overrides `host`
    /// - `MIRRORSTATE_PORT` overrides `port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Env`] if an override cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Defaults with environment overrides, for when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if an override cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields with environment variables when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if `MIRRORSTATE_PORT` is not a port.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("MIRRORSTATE_ROOT") {
            self.root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MIRRORSTATE_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("MIRRORSTATE_PORT") {
            self.port = val.parse().map_err(|e| ConfigError::Env {
                var: "MIRRORSTATE_PORT",
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }

    /// The watcher polling interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_suffix() -> String {
    String::from(".mirror.json")
}

fn default_ignore() -> Vec<String> {
    vec![
        String::from("node_modules"),
        String::from("target"),
        String::from(".git"),
    ]
}

const fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    String::from("/mirrorstate")
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

const fn default_port() -> u16 {
    5173
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_broadcast_capacity() -> usize {
    256
}
