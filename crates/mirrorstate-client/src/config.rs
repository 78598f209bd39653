//! Configuration for the client store.
//!
//! Loaded from environment variables, every one optional:
//!
//! - `MIRRORSTATE_URL` -- hub socket URL (default `ws://127.0.0.1:5173/mirrorstate`)
//! - `MIRRORSTATE_MODE` -- `live` or `production` (default `live`)
//! - `MIRRORSTATE_DEBOUNCE_MS` -- outbound debounce window (default 10)
//! - `MIRRORSTATE_SNAPSHOT_PATH` -- local snapshot file (default `mirrorstate.snapshot.json`)
//! - `MIRRORSTATE_RECONNECT_MS` -- delay between reconnect attempts (default 500)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;

/// Whether the store talks to a hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Development: a hub is reachable over a `WebSocket`.
    #[default]
    Live,
    /// Deployed: no hub; changes persist to a local snapshot.
    Production,
}

impl FromStr for Mode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" | "development" => Ok(Self::Live),
            "production" => Ok(Self::Production),
            other => Err(ClientError::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub socket URL.
    pub url: String,
    /// Live or production.
    pub mode: Mode,
    /// Outbound debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Path of the local snapshot used in production mode.
    pub snapshot_path: PathBuf,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::from("ws://127.0.0.1:5173/mirrorstate"),
            mode: Mode::Live,
            debounce_ms: 10,
            snapshot_path: PathBuf::from("mirrorstate.snapshot.json"),
            reconnect_delay_ms: 500,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mode = lookup("MIRRORSTATE_MODE")
            .map(|raw| raw.parse::<Mode>())
            .transpose()?
            .unwrap_or(defaults.mode);

        Ok(Self {
            url: lookup("MIRRORSTATE_URL").unwrap_or(defaults.url),
            mode,
            debounce_ms: parse_millis(&lookup, "MIRRORSTATE_DEBOUNCE_MS", defaults.debounce_ms)?,
            snapshot_path: lookup("MIRRORSTATE_SNAPSHOT_PATH")
                .map_or(defaults.snapshot_path, PathBuf::from),
            reconnect_delay_ms: parse_millis(
                &lookup,
                "MIRRORSTATE_RECONNECT_MS",
                defaults.reconnect_delay_ms,
            )?,
        })
    }

    /// Outbound debounce window.
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Delay between reconnect attempts.
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn parse_millis<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ClientError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| ClientError::Config(format!("invalid {key}: {e}")))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(10));
    }

    #[test]
    fn reads_every_variable() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MIRRORSTATE_URL", "ws://hub:9000/sync"),
            ("MIRRORSTATE_MODE", "Production"),
            ("MIRRORSTATE_DEBOUNCE_MS", "25"),
            ("MIRRORSTATE_SNAPSHOT_PATH", "/tmp/snap.json"),
            ("MIRRORSTATE_RECONNECT_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.url, "ws://hub:9000/sync");
        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.debounce_ms, 25);
        assert_eq!(config.snapshot_path, PathBuf::from("/tmp/snap.json"));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ClientConfig::from_lookup(lookup(&[("MIRRORSTATE_MODE", "staging")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("MIRRORSTATE_DEBOUNCE_MS", "soon")])).is_err());
    }
}
