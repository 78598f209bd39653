//! Shared type definitions for the `MirrorState` sync engine.
//!
//! This crate is the single source of truth for the data model and the
//! wire protocol spoken between the hub and its clients. Types that cross
//! the wire flow downstream to `TypeScript` via `ts-rs` so browser
//! consumers decode exactly the shapes the hub emits.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers (connection identifiers)
//! - [`name`] -- Validated state names and per-name sequence numbers
//! - [`canonical`] -- Canonical (key-sorted) JSON serialization
//! - [`snapshot`] -- Named states, build fingerprints, frozen inventories
//! - [`wire`] -- Client-to-hub and hub-to-client messages

pub mod canonical;
pub mod ids;
pub mod name;
pub mod snapshot;
pub mod wire;

// Re-export all public types at crate root for convenience.
pub use canonical::{CanonicalJson, canonical_json};
pub use ids::ConnectionId;
pub use name::{METADATA_PREFIX, NameError, Sequence, StateName};
pub use snapshot::{FINGERPRINT_KEY, Fingerprint, FrozenInventory, NamedState};
pub use wire::{ClientMessage, ServerMessage};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for wire types.

    #[test]
    fn export_bindings() {
        // ts-rs writes the files to `bindings/` relative to the crate root
        // when `export_all` is invoked.
        use ts_rs::TS;

        let _ = crate::name::StateName::export_all();
        let _ = crate::name::Sequence::export_all();
        let _ = crate::snapshot::Fingerprint::export_all();
        let _ = crate::snapshot::FrozenInventory::export_all();
        let _ = crate::snapshot::NamedState::export_all();
        let _ = crate::wire::ClientMessage::export_all();
        let _ = crate::wire::ServerMessage::export_all();
    }
}
