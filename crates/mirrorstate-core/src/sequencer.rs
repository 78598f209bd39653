//! Per-name sequence numbers and echo suppression.
//!
//! Every accepted value for a name gets the next sequence number. The
//! change watcher cannot tell an external edit from the echo of the hub's
//! own write, so before writing the hub records the exact value it is
//! about to persist (the pending own write). When the watcher later
//! reports that same value, the report is an echo and is swallowed.
//!
//! # Critical section
//!
//! Each name has its own [`SequenceSlot`] behind an async mutex. Client
//! submissions and watcher reports for the same name both go through
//! [`Sequencer::lock`], and the hub holds the guard for the whole
//! sequence-write-broadcast step. Different names never contend.

use std::collections::HashMap;
use std::sync::Arc;

use mirrorstate_types::{CanonicalJson, Sequence, StateName};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// The counter for a name ran out of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sequence counter exhausted")]
pub struct SequenceExhausted;

/// Classification of a value observed on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The hub's own write coming back; not announced.
    Echo,
    /// Same as the currently accepted value; nothing to announce.
    Unchanged,
    /// A genuine external change, accepted under the given sequence.
    External(Sequence),
}

/// Sequencing state of one name.
#[derive(Debug, Default)]
pub struct SequenceSlot {
    sequence: Sequence,
    accepted: Option<CanonicalJson>,
    pending_own_write: Option<CanonicalJson>,
}

impl SequenceSlot {
    /// A slot for a name whose value was loaded from the medium.
    pub const fn loaded(value: CanonicalJson) -> Self {
        Self {
            sequence: Sequence::ZERO,
            accepted: Some(value),
            pending_own_write: None,
        }
    }

    /// Sequence of the currently accepted value.
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Whether any value has been accepted for the name.
    pub const fn has_value(&self) -> bool {
        self.accepted.is_some()
    }

    /// Whether `value` equals the currently accepted value.
    pub fn is_current(&self, value: &CanonicalJson) -> bool {
        self.accepted.as_ref() == Some(value)
    }

    /// Whether a write by the hub is still waiting for its echo.
    pub const fn has_pending_own_write(&self) -> bool {
        self.pending_own_write.is_some()
    }

    /// Record the value the hub is about to write.
    ///
    /// Returns the previously pending value so a failed write can restore
    /// it with [`abort_own_write`](Self::abort_own_write).
    pub fn begin_own_write(&mut self, value: &CanonicalJson) -> Option<CanonicalJson> {
        self.pending_own_write.replace(value.clone())
    }

    /// The write landed: accept the value under the next sequence.
    ///
    /// The pending marker stays set until the watcher reports the echo.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceExhausted`] if the counter cannot advance.
    pub fn commit_own_write(
        &mut self,
        value: CanonicalJson,
    ) -> Result<Sequence, SequenceExhausted> {
        let next = self.sequence.next().ok_or(SequenceExhausted)?;
        self.sequence = next;
        self.accepted = Some(value);
        Ok(next)
    }

    /// The write failed: nothing was accepted.
    pub fn abort_own_write(&mut self, previous: Option<CanonicalJson>) {
        self.pending_own_write = previous;
    }

    /// Classify a value read back from the medium.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceExhausted`] if an external change cannot be
    /// given a new sequence.
    pub fn observe_medium(
        &mut self,
        value: &CanonicalJson,
    ) -> Result<Observation, SequenceExhausted> {
        if self.pending_own_write.as_ref() == Some(value) {
            self.pending_own_write = None;
            return Ok(Observation::Echo);
        }
        self.pending_own_write = None;

        if self.is_current(value) {
            return Ok(Observation::Unchanged);
        }

        let next = self.sequence.next().ok_or(SequenceExhausted)?;
        self.sequence = next;
        self.accepted = Some(value.clone());
        Ok(Observation::External(next))
    }
}

/// Owner of every name's [`SequenceSlot`].
#[derive(Default)]
pub struct Sequencer {
    slots: Mutex<HashMap<StateName, Arc<AsyncMutex<SequenceSlot>>>>,
}

impl Sequencer {
    /// Create a sequencer with no known names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name loaded from the medium at sequence zero.
    pub fn seed(&self, name: StateName, value: CanonicalJson) {
        self.slots
            .lock()
            .insert(name, Arc::new(AsyncMutex::new(SequenceSlot::loaded(value))));
    }

    /// Enter the critical section for a name, creating its slot if needed.
    pub async fn lock(&self, name: &StateName) -> OwnedMutexGuard<SequenceSlot> {
        let slot = Arc::clone(self.slots.lock().entry(name.clone()).or_default());
        slot.lock_owned().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn canon(value: &serde_json::Value) -> CanonicalJson {
        CanonicalJson::of(value)
    }

    #[test]
    fn own_write_echo_is_suppressed() {
        let mut slot = SequenceSlot::loaded(canon(&json!(0)));
        let prev = slot.begin_own_write(&canon(&json!(1)));
        assert!(prev.is_none());
        assert_eq!(slot.commit_own_write(canon(&json!(1))), Ok(Sequence(1)));

        assert_eq!(slot.observe_medium(&canon(&json!(1))), Ok(Observation::Echo));
        assert!(!slot.has_pending_own_write());
        assert_eq!(slot.sequence(), Sequence(1));
    }

    #[test]
    fn external_write_racing_our_echo_is_announced() {
        let mut slot = SequenceSlot::loaded(canon(&json!(0)));
        slot.begin_own_write(&canon(&json!(1)));
        slot.commit_own_write(canon(&json!(1))).unwrap();

        // Someone else overwrote the file before our echo was observed.
        assert_eq!(
            slot.observe_medium(&canon(&json!(99))),
            Ok(Observation::External(Sequence(2)))
        );
        assert!(!slot.has_pending_own_write());
    }

    #[test]
    fn external_change_without_pending_write_advances() {
        let mut slot = SequenceSlot::loaded(canon(&json!({"a": 1})));
        assert_eq!(
            slot.observe_medium(&canon(&json!({"a": 2}))),
            Ok(Observation::External(Sequence(1)))
        );
        assert_eq!(
            slot.observe_medium(&canon(&json!({"a": 2}))),
            Ok(Observation::Unchanged)
        );
    }

    #[test]
    fn aborted_write_restores_previous_pending() {
        let mut slot = SequenceSlot::loaded(canon(&json!(0)));
        slot.begin_own_write(&canon(&json!(1)));
        slot.commit_own_write(canon(&json!(1))).unwrap();

        let prev = slot.begin_own_write(&canon(&json!(2)));
        slot.abort_own_write(prev);
        assert_eq!(slot.sequence(), Sequence(1));
        assert!(slot.is_current(&canon(&json!(1))));
        // The first write's echo is still recognized.
        assert_eq!(slot.observe_medium(&canon(&json!(1))), Ok(Observation::Echo));
    }

    #[test]
    fn key_order_does_not_defeat_echo_detection() {
        let mut slot = SequenceSlot::default();
        let written: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let read_back: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        slot.begin_own_write(&canon(&written));
        slot.commit_own_write(canon(&written)).unwrap();
        assert_eq!(slot.observe_medium(&canon(&read_back)), Ok(Observation::Echo));
    }

    #[tokio::test]
    async fn lock_serializes_same_name() {
        let sequencer = Arc::new(Sequencer::new());
        let name = StateName::new("counter").unwrap();

        let guard = sequencer.lock(&name).await;
        let contender = {
            let sequencer = Arc::clone(&sequencer);
            let name = name.clone();
            tokio::spawn(async move {
                let mut slot = sequencer.lock(&name).await;
                slot.begin_own_write(&canon(&json!(2)));
                slot.commit_own_write(canon(&json!(2))).unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());
        drop(guard);
        assert_eq!(contender.await.unwrap(), Sequence(1));
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let sequencer = Sequencer::new();
        let _a = sequencer.lock(&StateName::new("a").unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            sequencer.lock(&StateName::new("b").unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }
}
