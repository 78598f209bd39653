//! Polling change detection on the medium.
//!
//! The watcher scans the medium on a fixed interval and reports every name
//! whose canonical content differs from its [`Baseline`]. It does not know
//! which writes came from the hub; that distinction belongs to the
//! sequencer. Several writes landing between two scans collapse into the
//! last one.
//!
//! The baseline is shared. A hub records every value it accepts into it,
//! so a scan is compared with what the hub holds rather than with what the
//! previous scan saw. An external edit that restores an older value right
//! after a hub write is therefore still reported.
//!
//! Missing roots, files created after start-up, files that disappear, and
//! half-written documents that fail to parse are all tolerated: the scan
//! simply reports what it can read.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use mirrorstate_types::{CanonicalJson, StateName};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::medium::{Medium, MediumError};

/// A name whose persisted content changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The changed state.
    pub name: StateName,
    /// Content observed by the scan.
    pub value: Value,
}

/// Last known content per name, shared between a watcher and its hub.
#[derive(Clone, Default)]
pub struct Baseline {
    known: Arc<Mutex<HashMap<StateName, CanonicalJson>>>,
}

impl Baseline {
    /// A baseline holding the given content.
    pub fn from_values(values: &BTreeMap<StateName, Value>) -> Self {
        let known = values
            .iter()
            .map(|(name, value)| (name.clone(), CanonicalJson::of(value)))
            .collect();
        Self {
            known: Arc::new(Mutex::new(known)),
        }
    }

    /// Record the content now expected on the medium for a name.
    pub fn record(&self, name: StateName, value: CanonicalJson) {
        self.known.lock().insert(name, value);
    }

    /// The recorded content of a name.
    pub fn get(&self, name: &StateName) -> Option<CanonicalJson> {
        self.known.lock().get(name).cloned()
    }
}

/// Scans a [`Medium`] for changes.
pub struct ChangeWatcher<M> {
    medium: Arc<M>,
    interval: Duration,
    baseline: Baseline,
}

impl<M: Medium> ChangeWatcher<M> {
    /// Create a watcher whose baseline is the given content.
    ///
    /// Pass the same values the hub was loaded from so nothing edited in
    /// between goes unnoticed.
    pub fn with_baseline(
        medium: Arc<M>,
        interval: Duration,
        baseline: &BTreeMap<StateName, Value>,
    ) -> Self {
        Self::sharing(medium, interval, Baseline::from_values(baseline))
    }

    /// Create a watcher comparing scans against a shared baseline.
    pub const fn sharing(medium: Arc<M>, interval: Duration, baseline: Baseline) -> Self {
        Self {
            medium,
            interval,
            baseline,
        }
    }

    /// Handle to this watcher's baseline.
    pub fn baseline(&self) -> Baseline {
        self.baseline.clone()
    }

    /// Create a watcher whose baseline is the medium's current content.
    ///
    /// # Errors
    ///
    /// Returns the medium's error if the initial scan fails.
    pub async fn seeded(medium: Arc<M>, interval: Duration) -> Result<Self, MediumError> {
        let current = medium.read_all().await?;
        Ok(Self::with_baseline(medium, interval, &current))
    }

    /// Run one scan and return the names that changed since the last one.
    ///
    /// # Errors
    ///
    /// Returns the medium's error if it cannot be enumerated; the baseline
    /// is left untouched in that case.
    pub async fn poll(&mut self) -> Result<Vec<ChangeEvent>, MediumError> {
        let current = self.medium.read_all().await?;
        let mut known = self.baseline.known.lock();

        known.retain(|name, _| {
            let present = current.contains_key(name);
            if !present {
                debug!(name = %name, "Mirror entry disappeared");
            }
            present
        });

        let mut events = Vec::new();
        for (name, value) in current {
            let canonical = CanonicalJson::of(&value);
            if known.get(&name) == Some(&canonical) {
                continue;
            }
            known.insert(name.clone(), canonical);
            events.push(ChangeEvent { name, value });
        }
        drop(known);
        Ok(events)
    }

    /// Poll on the configured interval until cancelled, forwarding events.
    ///
    /// The task also stops when the receiving side of `tx` is dropped.
    pub fn spawn(
        mut self,
        tx: mpsc::Sender<ChangeEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Change watcher cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let events = match self.poll().await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "Change watcher scan failed");
                        continue;
                    }
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!("Change receiver dropped, stopping watcher");
                        return;
                    }
                }
            }
        })
    }
}
