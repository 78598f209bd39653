//! Build-time enumeration and freezing.
//!
//! These read the medium directly and need no running hub, so a build
//! step can embed the current values into a production bundle.

use mirrorstate_types::{FrozenInventory, StateName};

use crate::medium::{Medium, MediumError};

/// Every name currently persisted on the medium, sorted.
///
/// # Errors
///
/// Returns the medium's error if it cannot be enumerated.
pub async fn enumerate_names<M: Medium>(medium: &M) -> Result<Vec<StateName>, MediumError> {
    Ok(medium.read_all().await?.into_keys().collect())
}

/// Snapshot every persisted value together with the names' fingerprint.
///
/// # Errors
///
/// Returns the medium's error if it cannot be enumerated.
pub async fn freeze_medium<M: Medium>(medium: &M) -> Result<FrozenInventory, MediumError> {
    let values = medium.read_all().await?;
    tracing::info!(names = values.len(), "Froze inventory");
    Ok(FrozenInventory::from_values(values))
}
