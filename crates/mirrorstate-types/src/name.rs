//! State names and sequence numbers.
//!
//! A [`StateName`] is the stable identifier of one independently
//! synchronized unit of JSON state. On the file medium it is the path of
//! the backing file relative to the watched root, without the suffix.
//!
//! Names beginning with [`METADATA_PREFIX`] are reserved so metadata keys
//! (the snapshot fingerprint) can share a document with state values
//! without ever colliding with a legal name.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

/// Prefix reserved for metadata keys in persisted documents.
pub const METADATA_PREFIX: char = '$';

/// Reasons a string is not a legal [`StateName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The name was empty.
    #[error("state name must not be empty")]
    Empty,

    /// The name starts with the reserved metadata prefix.
    #[error("state name {0:?} uses the reserved metadata prefix")]
    Reserved(String),
}

/// Validated, case-sensitive name of a synchronized state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateName(String);

impl StateName {
    /// Validate and wrap a name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Empty`] for an empty string and
    /// [`NameError::Reserved`] for names in the metadata namespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, NameError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(NameError::Empty);
        }
        if raw.starts_with(METADATA_PREFIX) {
            return Err(NameError::Reserved(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for StateName {
    type Error = NameError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl<'de> Deserialize<'de> for StateName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Per-name monotonic counter assigned by the hub.
///
/// Starts at zero when a name is first loaded and advances by exactly one
/// each time the hub accepts a new value for that name.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct Sequence(pub u64);

impl Sequence {
    /// The sequence of a freshly loaded name.
    pub const ZERO: Self = Self(0);

    /// The sequence that follows this one, or `None` on exhaustion.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Return the raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
