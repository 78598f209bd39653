//! Durable representation of named states.
//!
//! A [`Medium`] enumerates, reads, and writes whole JSON documents by
//! name. Failures are always reported to the caller; the hub decides how
//! to surface them and never treats an unpersisted value as accepted.
//!
//! Two implementations ship with the crate:
//!
//! - [`FileMedium`] -- one `<name><suffix>` file per state below a root
//!   directory, written atomically via a temporary sibling and rename
//! - [`MemoryMedium`] -- an in-process map, used by tests and embedders

use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use mirrorstate_types::StateName;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HubConfig;

/// Errors raised by a [`Medium`].
#[derive(Debug, thiserror::Error)]
pub enum MediumError {
    /// The value could not be serialized.
    #[error("failed to serialize {name}: {source}")]
    Serialization {
        /// State being written.
        name: StateName,
        /// The underlying serde error.
        source: serde_json::Error,
    },

    /// A stored document is not valid JSON.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// Location of the document.
        path: PathBuf,
        /// The underlying serde error.
        source: serde_json::Error,
    },

    /// The medium could not be read or written.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Location being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The name does not map to a location inside the medium.
    #[error("state name {0} escapes the medium root")]
    OutsideRoot(StateName),
}

/// Durable storage for named states.
pub trait Medium: Send + Sync + 'static {
    /// Enumerate everything currently persisted.
    fn read_all(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<StateName, Value>, MediumError>> + Send;

    /// Read one state. `Ok(None)` means nothing is persisted under the name.
    fn read(
        &self,
        name: &StateName,
    ) -> impl Future<Output = Result<Option<Value>, MediumError>> + Send;

    /// Persist a whole value, replacing any previous one.
    fn write(
        &self,
        name: &StateName,
        value: &Value,
    ) -> impl Future<Output = Result<(), MediumError>> + Send;
}

// =========================================================================
// File medium
// =========================================================================

/// Mirror files below a root directory.
#[derive(Debug, Clone)]
pub struct FileMedium {
    root: PathBuf,
    suffix: String,
    ignore: Vec<String>,
    pretty: bool,
}

impl FileMedium {
    /// Create a file medium with default suffix and ignore list.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = HubConfig::default();
        Self {
            root: root.into(),
            suffix: defaults.file_suffix,
            ignore: defaults.ignore,
            pretty: defaults.pretty_print,
        }
    }

    /// Create a file medium from hub configuration.
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            root: config.root.clone(),
            suffix: config.file_suffix.clone(),
            ignore: config.ignore.clone(),
            pretty: config.pretty_print,
        }
    }

    /// Toggle pretty-printed output.
    #[must_use]
    pub const fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// The watched root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a name.
    ///
    /// # Errors
    ///
    /// Returns [`MediumError::OutsideRoot`] for names that are absolute or
    /// contain `..` segments.
    pub fn path_for(&self, name: &StateName) -> Result<PathBuf, MediumError> {
        let relative = Path::new(name.as_str());
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(MediumError::OutsideRoot(name.clone()));
        }
        Ok(self.root.join(format!("{}{}", name.as_str(), self.suffix)))
    }

    /// Derive the state name of a file below the root.
    fn name_for(&self, path: &Path) -> Option<StateName> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        let joined = parts.join("/");
        let stem = joined.strip_suffix(self.suffix.as_str())?;
        match StateName::new(stem) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping mirror file with unusable name");
                None
            }
        }
    }

    fn skip_dir(&self, dir_name: &str) -> bool {
        dir_name.starts_with('.') || self.ignore.iter().any(|i| i == dir_name)
    }

    async fn read_path(path: &Path) -> Result<Option<Value>, MediumError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| MediumError::Parse {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(MediumError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MediumError + '_ {
    move |source| MediumError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl Medium for FileMedium {
    async fn read_all(&self) -> Result<BTreeMap<StateName, Value>, MediumError> {
        let mut found = BTreeMap::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // The root may not exist yet; files created later are
                // picked up by the next scan.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(MediumError::Io { path: dir, source }),
            };

            while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(io_error(&path))?;
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else {
                    continue;
                };

                if file_type.is_dir() {
                    if !self.skip_dir(file_name) {
                        pending.push(path);
                    }
                    continue;
                }
                if file_name.starts_with('.') || !file_name.ends_with(self.suffix.as_str()) {
                    continue;
                }
                let Some(name) = self.name_for(&path) else {
                    continue;
                };

                match Self::read_path(&path).await {
                    Ok(Some(value)) => {
                        found.insert(name, value);
                    }
                    Ok(None) => {}
                    Err(MediumError::Parse { path, source }) => {
                        warn!(path = %path.display(), error = %source, "Skipping unparseable mirror file");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(found)
    }

    async fn read(&self, name: &StateName) -> Result<Option<Value>, MediumError> {
        let path = self.path_for(name)?;
        Self::read_path(&path).await
    }

    async fn write(&self, name: &StateName, value: &Value) -> Result<(), MediumError> {
        let path = self.path_for(name)?;
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|source| MediumError::Serialization {
            name: name.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }

        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| MediumError::OutsideRoot(name.clone()))?;
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));

        tokio::fs::write(&tmp, &bytes).await.map_err(io_error(&tmp))?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MediumError::Io { path, source });
        }

        debug!(name = %name, bytes = bytes.len(), "Wrote mirror file");
        Ok(())
    }
}

// =========================================================================
// Memory medium
// =========================================================================

/// In-process medium.
///
/// [`edit_externally`](Self::edit_externally) and
/// [`remove_externally`](Self::remove_externally) simulate edits made
/// behind the hub's back. [`fail_writes`](Self::fail_writes) makes every
/// subsequent write fail with an I/O error.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    values: Mutex<BTreeMap<StateName, Value>>,
    failing: Mutex<bool>,
}

impl MemoryMedium {
    /// Create an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a medium pre-populated with values.
    pub fn with_values(values: BTreeMap<StateName, Value>) -> Self {
        Self {
            values: Mutex::new(values),
            failing: Mutex::new(false),
        }
    }

    /// Change a value without going through [`Medium::write`].
    pub fn edit_externally(&self, name: StateName, value: Value) {
        self.values.lock().insert(name, value);
    }

    /// Delete a value without going through the hub.
    pub fn remove_externally(&self, name: &StateName) {
        self.values.lock().remove(name);
    }

    /// Make writes fail (`true`) or succeed (`false`).
    pub fn fail_writes(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Current stored value of a name.
    pub fn stored(&self, name: &StateName) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }
}

impl Medium for MemoryMedium {
    async fn read_all(&self) -> Result<BTreeMap<StateName, Value>, MediumError> {
        Ok(self.values.lock().clone())
    }

    async fn read(&self, name: &StateName) -> Result<Option<Value>, MediumError> {
        Ok(self.values.lock().get(name).cloned())
    }

    async fn write(&self, name: &StateName, value: &Value) -> Result<(), MediumError> {
        if *self.failing.lock() {
            return Err(MediumError::Io {
                path: PathBuf::from(name.as_str()),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        self.values.lock().insert(name.clone(), value.clone());
        Ok(())
    }
}
