//! Fingerprinted local snapshot for production mode.
//!
//! The snapshot is one JSON object: every persisted name maps to its
//! value, and the reserved key `$fingerprint` records the build the
//! values belong to. A snapshot from another build is treated as absent
//! and deleted on load so stale values are never resurrected.
//!
//! Each save rewrites the whole document through a temporary file and a
//! rename, so the name and the fingerprint tag always change together.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mirrorstate_types::{FINGERPRINT_KEY, Fingerprint, METADATA_PREFIX, StateName};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;

/// Local snapshot file bound to one build fingerprint.
#[derive(Debug)]
pub struct LocalSnapshot {
    path: PathBuf,
    fingerprint: Fingerprint,
    write_lock: Mutex<()>,
}

impl LocalSnapshot {
    /// Bind a snapshot file to the current build's fingerprint.
    pub fn new(path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted values.
    ///
    /// Returns `None` if there is no snapshot, or if its fingerprint does
    /// not match; a mismatched snapshot is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Option<BTreeMap<StateName, Value>>, PersistenceError> {
        let Some(document) = self.read_document()? else {
            return Ok(None);
        };

        let stored = document.get(FINGERPRINT_KEY).and_then(Value::as_str);
        if stored != Some(self.fingerprint.as_str()) {
            info!(
                path = %self.path.display(),
                stored = stored.unwrap_or("<none>"),
                current = %self.fingerprint.as_str(),
                "Discarding snapshot from another build"
            );
            self.discard()?;
            return Ok(None);
        }

        let values = document
            .into_iter()
            .filter(|(key, _)| !key.starts_with(METADATA_PREFIX))
            .filter_map(|(key, value)| match StateName::new(key) {
                Ok(name) => Some((name, value)),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid name in snapshot");
                    None
                }
            })
            .collect();
        Ok(Some(values))
    }

    /// Persist one name's value.
    ///
    /// Values already in a snapshot of the same build are kept; a
    /// snapshot from another build is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the snapshot cannot be written.
    pub fn save(&self, name: &StateName, value: &Value) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();

        let mut document = match self.read_document() {
            Ok(Some(doc))
                if doc.get(FINGERPRINT_KEY).and_then(Value::as_str)
                    == Some(self.fingerprint.as_str()) =>
            {
                doc
            }
            Ok(_) => Map::new(),
            Err(e) => {
                warn!(error = %e, "Replacing unreadable snapshot");
                Map::new()
            }
        };
        document.insert(
            FINGERPRINT_KEY.to_owned(),
            Value::String(self.fingerprint.as_str().to_owned()),
        );
        document.insert(name.as_str().to_owned(), value.clone());

        let bytes = serde_json::to_vec_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(name = %name, path = %self.path.display(), "Snapshot saved");
        Ok(())
    }

    fn read_document(&self) -> Result<Option<Map<String, Value>>, PersistenceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn discard(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
