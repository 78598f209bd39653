//! Named states, build fingerprints, and frozen inventories.
//!
//! At build time the hub freezes every named state it knows into a
//! [`FrozenInventory`]. The inventory's [`Fingerprint`] is derived from
//! the set of names only, so it changes exactly when the inventory
//! changes and stays put while values are edited. Deployed clients use
//! the fingerprint to reject persisted snapshots written by another build.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::name::{Sequence, StateName};

/// Metadata key holding the fingerprint inside a persisted snapshot.
///
/// Starts with [`crate::METADATA_PREFIX`], so no legal name equals it.
pub const FINGERPRINT_KEY: &str = "$fingerprint";

/// Number of digest bytes kept in a fingerprint (16 hex characters).
const FINGERPRINT_BYTES: usize = 8;

/// One synchronized unit of state together with its accepted sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NamedState {
    /// Stable identifier of the state.
    pub name: StateName,
    /// The most recently accepted value.
    pub value: Value,
    /// Sequence number under which the value was accepted.
    pub sequence: Sequence,
}

/// Short deterministic hash identifying a set of state names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Fingerprint a set of names.
    ///
    /// Order and duplicates in the input do not affect the result.
    pub fn of_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a StateName>,
    {
        let mut sorted: Vec<&str> = names.into_iter().map(StateName::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for name in sorted {
            hasher.update(name.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let short = digest.get(..FINGERPRINT_BYTES).unwrap_or_default();
        Self(hex::encode(short))
    }

    /// Borrow the fingerprint text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static artifact embedded by the build pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FrozenInventory {
    /// Fingerprint of the frozen name set.
    pub fingerprint: Fingerprint,
    /// Value of every named state at freeze time.
    pub values: BTreeMap<StateName, Value>,
}

impl FrozenInventory {
    /// Freeze a set of values, computing their fingerprint.
    pub fn from_values(values: BTreeMap<StateName, Value>) -> Self {
        let fingerprint = Fingerprint::of_names(values.keys());
        Self {
            fingerprint,
            values,
        }
    }

    /// Names contained in the inventory, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &StateName> {
        self.values.keys()
    }

    /// Inlined value for a name, if it was known at build time.
    pub fn get(&self, name: &StateName) -> Option<&Value> {
        self.values.get(name)
    }
}

impl Default for FrozenInventory {
    fn default() -> Self {
        Self::from_values(BTreeMap::new())
    }
}
