//! `MirrorState` binary.
//!
//! Serves a directory of mirror files to browser and native clients,
//! and provides the build-time commands that freeze or list the states
//! in that directory.
//!
//! # Commands
//!
//! - `serve` -- run hub, change watcher, and HTTP server until Ctrl-C
//! - `freeze` -- print or write the frozen inventory as JSON
//! - `names` -- list every named state, one per line
//!
//! Configuration comes from `mirrorstate.yaml` (or `--config`) with
//! `MIRRORSTATE_*` environment overrides.

mod error;

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mirrorstate_core::{FileMedium, HubConfig, inventory};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, read when present.
const DEFAULT_CONFIG: &str = "mirrorstate.yaml";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the hub until interrupted.
    Serve,
    /// Freeze every named state into a JSON inventory.
    Freeze {
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List every named state.
    Names,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    info!(
        root = %config.root.display(),
        suffix = config.file_suffix,
        "Configuration loaded"
    );

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Freeze { out } => freeze(&config, out.as_deref()).await,
        Command::Names => names(&config).await,
    }
}

/// Load configuration from `path`, or from `mirrorstate.yaml` if it
/// exists. Environment overrides apply either way.
fn load_config(path: Option<&Path>) -> Result<HubConfig, AppError> {
    let config = match path {
        Some(path) => HubConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            HubConfig::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => {
            info!("Config file not found, using defaults");
            HubConfig::from_env()?
        }
    };
    Ok(config)
}

async fn serve(config: &HubConfig) -> Result<(), AppError> {
    let running = mirrorstate_server::spawn_server(config).await?;
    info!(
        addr = %running.local_addr(),
        ws_path = config.ws_path,
        "mirrorstate serving"
    );

    tokio::signal::ctrl_c().await.map_err(|source| AppError::Io {
        path: PathBuf::from("<signal>"),
        source,
    })?;
    info!("Interrupt received");

    running.shutdown().await?;
    Ok(())
}

async fn freeze(config: &HubConfig, out: Option<&Path>) -> Result<(), AppError> {
    let medium = FileMedium::from_config(config);
    let frozen = inventory::freeze_medium(&medium).await?;
    let json = serde_json::to_string_pretty(&frozen)?;

    match out {
        Some(path) => {
            std::fs::write(path, json).map_err(|source| AppError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            info!(
                path = %path.display(),
                fingerprint = frozen.fingerprint.as_str(),
                "Inventory written"
            );
        }
        None => print_line(&json)?,
    }
    Ok(())
}

async fn names(config: &HubConfig) -> Result<(), AppError> {
    let medium = FileMedium::from_config(config);
    for name in inventory::enumerate_names(&medium).await? {
        print_line(name.as_str())?;
    }
    Ok(())
}

fn print_line(line: &str) -> Result<(), AppError> {
    writeln!(std::io::stdout().lock(), "{line}").map_err(|source| AppError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.yaml");
        std::fs::write(&path, "file_suffix: .state.json\npoll_interval_ms: 25\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.file_suffix, ".state.json");
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.ws_path, "/mirrorstate");
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.yaml")));
        assert!(matches!(result, Err(AppError::Config { .. })));
    }
}
