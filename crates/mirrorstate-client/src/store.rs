//! Client-side cache of named states.
//!
//! The [`ClientStore`] keeps the latest known value of every name the
//! consumer registered, applies local mutations optimistically, and
//! reconciles inbound hub messages by sequence.
//!
//! # Outbound path
//!
//! ```text
//! mutate --> batch (same turn) --> flush: apply in order, notify once
//!                                    |
//!                                    v
//!                             debounce timer --(newest wins)--> send
//!                                                                 |
//!                                          no channel? --> offline queue
//! ```
//!
//! A debounce timer carries the generation it was armed with and only
//! dispatches if that generation is still current when it fires. The
//! check and the dispatch happen under the same lock, so a cancelled or
//! superseded timer can never send after a newer value went out. The
//! timer sends the name's value as it stands when it fires, so an inbound
//! value that landed during the window is not overwritten by a stale one.
//!
//! In production mode the "send" is a write to the local snapshot. Those
//! writes run on a blocking worker, one per name at a time, newest value
//! winning.
//!
//! # Inbound path
//!
//! Inbound values are applied only when their sequence is strictly
//! greater than the last one applied for the name. Attaching a new
//! channel clears that baseline, since the new connection's
//! `initialState` messages restart it. An `initialState` never
//! overwrites a name that still has local changes on their way out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use mirrorstate_core::{StateStore, Subscription};
use mirrorstate_types::{
    CanonicalJson, ClientMessage, FrozenInventory, Sequence, ServerMessage, StateName,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Mode};
use crate::error::ClientError;
use crate::handle::StateHandle;
use crate::persistence::LocalSnapshot;

/// Capacity of the [`ClientEvent`] channel.
const EVENT_CAPACITY: usize = 64;

/// A queued local mutation.
///
/// Receives an owned copy of the current value and returns the next one.
pub type Updater = Box<dyn FnOnce(Value) -> Result<Value, ClientError> + Send>;

/// Notable events surfaced to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The hub could not persist a mutation sent from this store.
    WriteFailed {
        /// State name.
        name: StateName,
        /// The hub's description of the failure.
        message: String,
    },
}

#[derive(Default)]
struct NameSlot {
    handles: usize,
    initialized: bool,
    batch: Vec<Updater>,
    flush_scheduled: bool,
    generation: u64,
    debounce_pending: bool,
    queued: Option<ClientMessage>,
    resent: bool,
    last_applied: Option<Sequence>,
    last_synced: Option<CanonicalJson>,
    unsaved: Option<Value>,
    saving: bool,
}

impl NameSlot {
    fn has_local_changes(&self) -> bool {
        !self.batch.is_empty()
            || self.flush_scheduled
            || self.debounce_pending
            || self.queued.is_some()
            || self.resent
    }

    const fn cancel_debounce(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.debounce_pending = false;
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<StateName, NameSlot>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
}

struct Shared {
    config: ClientConfig,
    frozen: FrozenInventory,
    snapshot: Option<LocalSnapshot>,
    persisted: BTreeMap<StateName, Value>,
    values: StateStore<Value>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ClientEvent>,
    cancel: CancellationToken,
}

/// Shared handle to a client-side state cache.
///
/// Cloning is cheap; clones share the same cache and connection.
#[derive(Clone)]
pub struct ClientStore {
    shared: Arc<Shared>,
}

impl ClientStore {
    /// Create a store with no frozen inventory.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_inventory(config, FrozenInventory::default())
    }

    /// Create a store seeded by a build-time inventory.
    ///
    /// In production mode the local snapshot is loaded here; a snapshot
    /// from another build is discarded.
    pub fn with_inventory(config: ClientConfig, frozen: FrozenInventory) -> Self {
        let (snapshot, persisted) = match config.mode {
            Mode::Live => (None, BTreeMap::new()),
            Mode::Production => {
                let snapshot =
                    LocalSnapshot::new(config.snapshot_path.clone(), frozen.fingerprint.clone());
                let persisted = match snapshot.load() {
                    Ok(values) => values.unwrap_or_default(),
                    Err(e) => {
                        warn!(error = %e, "Ignoring unreadable local snapshot");
                        BTreeMap::new()
                    }
                };
                (Some(snapshot), persisted)
            }
        };

        info!(
            mode = ?config.mode,
            inlined = frozen.values.len(),
            persisted = persisted.len(),
            "Client store created"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                frozen,
                snapshot,
                persisted,
                values: StateStore::new(),
                inner: Mutex::new(Inner::default()),
                events,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The store's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Subscribe to [`ClientEvent`]s.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Register a consumer of `name` and return a typed handle.
    ///
    /// If the store has no value for the name yet, the first of these
    /// wins: the frozen inventory, the local snapshot (production only),
    /// then `default`. A default that wins is also written through to the
    /// hub (as an `init` message) or to the local snapshot, once per name
    /// for the lifetime of the store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidName`] for an unusable name and
    /// [`ClientError::Serialization`] if `default` cannot be serialized.
    pub fn state<T>(&self, name: &str, default: Option<T>) -> Result<StateHandle<T>, ClientError>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let name = StateName::new(name)?;
        let default = default.map(serde_json::to_value).transpose()?;

        let mut inner = self.shared.inner.lock();
        let Inner { slots, outbound } = &mut *inner;
        let slot = slots.entry(name.clone()).or_default();
        slot.handles = slot.handles.saturating_add(1);

        if !self.shared.values.contains(&name) {
            if let Some(value) = self.shared.frozen.get(&name) {
                debug!(name = %name, "Initial value from frozen inventory");
                self.shared.values.set(name.clone(), value.clone());
            } else if let Some(value) = self.shared.persisted.get(&name) {
                debug!(name = %name, "Initial value from local snapshot");
                self.shared.values.set(name.clone(), value.clone());
            } else if let Some(value) = default {
                debug!(name = %name, "Initial value from default");
                self.shared.values.set(name.clone(), value.clone());
                if !slot.initialized {
                    slot.initialized = true;
                    self.dispatch(slot, outbound.as_ref(), ClientMessage::init(name.clone(), value));
                }
            }
        }
        drop(inner);

        Ok(StateHandle::new(self.clone(), name))
    }

    /// Current value of a name.
    pub fn value(&self, name: &StateName) -> Option<Value> {
        self.shared.values.get(name)
    }

    /// Subscribe to a name's values, starting with the current one.
    pub fn subscribe(&self, name: &StateName) -> Subscription<Value> {
        self.shared.values.subscribe(name)
    }

    /// Last sequence applied from the hub for a name.
    pub fn last_applied(&self, name: &StateName) -> Option<Sequence> {
        self.shared
            .inner
            .lock()
            .slots
            .get(name)
            .and_then(|slot| slot.last_applied)
    }

    /// Whether a live channel is attached.
    pub fn is_attached(&self) -> bool {
        self.shared.inner.lock().outbound.is_some()
    }

    /// Queue a mutation for this scheduler turn.
    ///
    /// All mutations queued for a name before the flush task runs are
    /// applied in call order against one base value, and the result is
    /// published to subscribers once. Must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unregistered`] if no [`StateHandle`] for the
    /// name is alive; such a change could never be sent or persisted.
    pub fn mutate(&self, name: &StateName, updater: Updater) -> Result<(), ClientError> {
        let mut inner = self.shared.inner.lock();
        let Some(slot) = inner.slots.get_mut(name).filter(|slot| slot.handles > 0) else {
            warn!(name = %name, "Rejecting mutation of a name with no live handle");
            return Err(ClientError::Unregistered(name.clone()));
        };
        slot.batch.push(updater);
        if slot.flush_scheduled {
            return Ok(());
        }
        slot.flush_scheduled = true;
        drop(inner);

        self.schedule_flush(name.clone());
        Ok(())
    }

    fn schedule_flush(&self, name: StateName) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            store.flush(&name);
        });
    }

    fn flush(&self, name: &StateName) {
        let updaters = {
            let mut inner = self.shared.inner.lock();
            let Some(slot) = inner.slots.get_mut(name) else {
                return;
            };
            std::mem::take(&mut slot.batch)
        };

        let count = updaters.len();
        let mut value = self.shared.values.get(name).unwrap_or(Value::Null);
        for updater in updaters {
            match updater(value.clone()) {
                Ok(next) => value = next,
                Err(e) => warn!(name = %name, error = %e, "Discarding failed update"),
            }
        }

        let mut inner = self.shared.inner.lock();
        let Some(slot) = inner.slots.get_mut(name) else {
            return;
        };
        if slot.batch.is_empty() {
            slot.flush_scheduled = false;
        } else {
            // More mutations arrived while applying; fold them in next turn.
            self.schedule_flush(name.clone());
        }

        self.shared.values.set(name.clone(), value.clone());
        debug!(name = %name, count, "Flushed batched mutations");

        if slot.handles == 0 {
            debug!(name = %name, "Handles released before flush, not sending");
            return;
        }
        slot.cancel_debounce();
        slot.debounce_pending = true;
        let generation = slot.generation;
        drop(inner);

        self.schedule_send(name.clone(), generation);
    }

    fn schedule_send(&self, name: StateName, generation: u64) {
        let store = self.clone();
        let delay = self.shared.config.debounce();
        let cancel = self.shared.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let mut inner = store.shared.inner.lock();
            let Inner { slots, outbound } = &mut *inner;
            let Some(slot) = slots.get_mut(&name) else {
                return;
            };
            if slot.generation != generation {
                debug!(name = %name, "Debounced send superseded");
                return;
            }
            slot.debounce_pending = false;
            let Some(value) = store.shared.values.get(&name) else {
                return;
            };
            store.dispatch(slot, outbound.as_ref(), ClientMessage::update(name, value));
        });
    }

    /// Hand a message to the live channel, the offline queue, or the
    /// local snapshot. Called with the inner lock held.
    fn dispatch(
        &self,
        slot: &mut NameSlot,
        outbound: Option<&mpsc::UnboundedSender<ClientMessage>>,
        msg: ClientMessage,
    ) {
        let canonical = CanonicalJson::of(&msg.value);
        if !msg.init && slot.last_synced.as_ref() == Some(&canonical) {
            debug!(name = %msg.name, "Value already synced, not sending");
            return;
        }

        if let Some(snapshot) = &self.shared.snapshot {
            slot.last_synced = Some(canonical);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                slot.unsaved = Some(msg.value);
                if !slot.saving {
                    slot.saving = true;
                    let store = self.clone();
                    drop(runtime.spawn_blocking(move || store.drain_saves(&msg.name)));
                }
            } else if let Err(e) = snapshot.save(&msg.name, &msg.value) {
                // No runtime to stall; save in place.
                slot.last_synced = None;
                warn!(name = %msg.name, error = %e, "Failed to persist local snapshot");
            }
            return;
        }

        let unsent = match outbound {
            Some(tx) => match tx.send(msg) {
                Ok(()) => {
                    slot.last_synced = Some(canonical);
                    return;
                }
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        debug!(name = %unsent.name, "No channel open, queued for reconnect");
        slot.queued = Some(unsent);
    }

    /// Write a name's newest unsaved value until none is left.
    ///
    /// Runs on the blocking pool with the store lock released during I/O.
    fn drain_saves(&self, name: &StateName) {
        let Some(snapshot) = &self.shared.snapshot else {
            return;
        };
        loop {
            let value = {
                let mut inner = self.shared.inner.lock();
                let Some(slot) = inner.slots.get_mut(name) else {
                    return;
                };
                let Some(value) = slot.unsaved.take() else {
                    slot.saving = false;
                    return;
                };
                value
            };

            if let Err(e) = snapshot.save(name, &value) {
                warn!(name = %name, error = %e, "Failed to persist local snapshot");
                if let Some(slot) = self.shared.inner.lock().slots.get_mut(name) {
                    slot.last_synced = None;
                }
            }
        }
    }

    /// Attach a freshly opened channel.
    ///
    /// Resets every name's sequence baseline, since the new connection's
    /// `initialState` messages restart the count, and flushes the offline
    /// queue in full.
    pub fn attach(&self, tx: mpsc::UnboundedSender<ClientMessage>) {
        let mut inner = self.shared.inner.lock();
        let mut flushed: usize = 0;
        for slot in inner.slots.values_mut() {
            slot.last_applied = None;
            slot.last_synced = None;
            if let Some(msg) = slot.queued.take() {
                let init = msg.init;
                match tx.send(msg) {
                    Ok(()) => {
                        // A default must not mask the hub's value; a real edit must.
                        slot.resent = !init;
                        flushed = flushed.saturating_add(1);
                    }
                    Err(mpsc::error::SendError(msg)) => slot.queued = Some(msg),
                }
            }
        }
        inner.outbound = Some(tx);
        info!(flushed, "Attached to hub");
    }

    /// Detach the current channel; later sends go to the offline queue.
    ///
    /// `failed` is a message the socket refused, and `pending` holds the
    /// messages the store handed over that were never written. Both go
    /// back to the offline queue, newest per name winning.
    pub fn detach(
        &self,
        failed: Option<ClientMessage>,
        pending: &mut mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        let mut inner = self.shared.inner.lock();
        inner.outbound = None;

        let unsent = failed
            .into_iter()
            .chain(std::iter::from_fn(|| pending.try_recv().ok()));
        let mut requeued: usize = 0;
        for msg in unsent {
            let slot = inner.slots.entry(msg.name.clone()).or_default();
            slot.last_synced = None;
            slot.queued = Some(msg);
            requeued = requeued.saturating_add(1);
        }
        info!(requeued, "Detached from hub");
    }

    /// Parse and apply one inbound text frame.
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => self.apply(msg),
            Err(e) => warn!(error = %e, "Dropping malformed server message"),
        }
    }

    /// Apply one inbound hub message.
    pub fn apply(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::InitialState {
                name,
                value,
                sequence,
            } => self.reconcile(name, value, sequence, true),
            ServerMessage::FileChange {
                name,
                value,
                sequence,
            }
            | ServerMessage::Update {
                name,
                value,
                sequence,
            } => self.reconcile(name, value, sequence, false),
            ServerMessage::WriteFailed { name, message } => {
                warn!(name = %name, %message, "Hub failed to persist mutation");
                if let Some(slot) = self.shared.inner.lock().slots.get_mut(&name) {
                    slot.last_synced = None;
                }
                // No receivers is fine.
                let _ = self
                    .shared
                    .events
                    .send(ClientEvent::WriteFailed { name, message });
            }
        }
    }

    fn reconcile(&self, name: StateName, value: Value, sequence: Sequence, initial: bool) {
        let mut inner = self.shared.inner.lock();
        let slot = inner.slots.entry(name.clone()).or_default();

        if initial && slot.has_local_changes() {
            slot.resent = false;
            slot.last_applied = slot.last_applied.max(Some(sequence));
            debug!(name = %name, %sequence, "Keeping local value over initial state");
            return;
        }
        if slot.last_applied.is_some_and(|seen| seen >= sequence) {
            debug!(name = %name, %sequence, "Dropping stale or duplicate delivery");
            return;
        }

        let canonical = CanonicalJson::of(&value);
        slot.last_applied = Some(sequence);
        slot.last_synced = Some(canonical.clone());

        let current = self.shared.values.get(&name).map(|v| CanonicalJson::of(&v));
        if current.as_ref() != Some(&canonical) {
            debug!(name = %name, %sequence, "Applying inbound value");
            self.shared.values.set(name, value);
        }
    }

    /// Release one handle's claim on a name.
    ///
    /// When the last handle goes, a pending debounced send is cancelled.
    pub(crate) fn release(&self, name: &StateName) {
        let mut inner = self.shared.inner.lock();
        if let Some(slot) = inner.slots.get_mut(name) {
            slot.handles = slot.handles.saturating_sub(1);
            if slot.handles == 0 && slot.debounce_pending {
                slot.cancel_debounce();
                debug!(name = %name, "Cancelled pending send for released name");
            }
        }
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Cancel every pending send and stop the connection loop.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        let mut inner = self.shared.inner.lock();
        for slot in inner.slots.values_mut() {
            slot.cancel_debounce();
        }
        inner.outbound = None;
        info!("Client store shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use mirrorstate_types::Fingerprint;
    use serde_json::json;

    use super::*;

    fn name(raw: &str) -> StateName {
        StateName::new(raw).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn attached() -> (ClientStore, mpsc::UnboundedReceiver<ClientMessage>) {
        let store = ClientStore::new(ClientConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        store.attach(tx);
        (store, rx)
    }

    fn production(dir: &tempfile::TempDir, frozen: FrozenInventory) -> ClientStore {
        let config = ClientConfig {
            mode: Mode::Production,
            snapshot_path: dir.path().join("snap.json"),
            ..ClientConfig::default()
        };
        ClientStore::with_inventory(config, frozen)
    }

    #[tokio::test(start_paused = true)]
    async fn batched_mutations_send_one_message() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        assert_eq!(drain(&mut rx), vec![ClientMessage::init(name("counter"), json!(0))]);

        for _ in 0..3 {
            counter.mutate(|n| n + 1);
        }
        settle().await;

        assert_eq!(counter.get().unwrap(), Some(3));
        assert_eq!(drain(&mut rx), vec![ClientMessage::update(name("counter"), json!(3))]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_notifies_subscribers_once() {
        let (store, _rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        let mut sub = counter.subscribe();
        assert_eq!(sub.recv().await, Some(0));

        counter.mutate(|n| n + 1);
        counter.mutate(|n| n * 10);
        settle().await;

        assert_eq!(sub.recv().await, Some(10));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_sends_only_latest_value() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        counter.set(1).unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
        counter.set(2).unwrap();
        settle().await;

        assert_eq!(drain(&mut rx), vec![ClientMessage::update(name("counter"), json!(2))]);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_mutation_is_sent_once_on_attach() {
        let store = ClientStore::new(ClientConfig::default());
        let counter = store.state("counter", Some(0_i64)).unwrap();
        counter.set(5).unwrap();
        settle().await;
        counter.set(7).unwrap();
        settle().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.attach(tx);
        assert_eq!(drain(&mut rx), vec![ClientMessage::update(name("counter"), json!(7))]);

        // The reconnect snapshot predates the queued write and must not revert it.
        store.apply(ServerMessage::InitialState {
            name: name("counter"),
            value: json!(0),
            sequence: Sequence::ZERO,
        });
        assert_eq!(counter.get().unwrap(), Some(7));
        settle().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn inbound_updates_are_idempotent_and_monotonic() {
        let (store, _rx) = attached();
        let counter = store.state::<i64>("counter", None).unwrap();

        let update = |value: i64, seq: u64| ServerMessage::Update {
            name: name("counter"),
            value: json!(value),
            sequence: Sequence(seq),
        };
        store.apply(update(5, 2));
        assert_eq!(counter.get().unwrap(), Some(5));
        store.apply(update(9, 1));
        store.apply(update(9, 2));
        assert_eq!(counter.get().unwrap(), Some(5));
        store.apply(update(9, 3));
        assert_eq!(counter.get().unwrap(), Some(9));
        assert_eq!(store.last_applied(&name("counter")), Some(Sequence(3)));
    }

    #[tokio::test]
    async fn attach_resets_sequence_baseline() {
        let (store, _rx) = attached();
        store.apply(ServerMessage::FileChange {
            name: name("counter"),
            value: json!(4),
            sequence: Sequence(4),
        });

        let (tx, _rx2) = mpsc::unbounded_channel();
        store.attach(tx);
        store.apply(ServerMessage::InitialState {
            name: name("counter"),
            value: json!(1),
            sequence: Sequence(1),
        });
        assert_eq!(store.value(&name("counter")), Some(json!(1)));
    }

    #[tokio::test]
    async fn default_is_written_through_once() {
        let (store, mut rx) = attached();
        let first = store.state("todos", Some(Vec::<String>::new())).unwrap();
        drop(first);
        let _second = store.state("todos", Some(vec![String::from("x")])).unwrap();

        assert_eq!(drain(&mut rx), vec![ClientMessage::init(name("todos"), json!([]))]);
        assert_eq!(store.value(&name("todos")), Some(json!([])));
    }

    #[tokio::test]
    async fn frozen_inventory_beats_default() {
        let frozen = FrozenInventory::from_values([(name("theme"), json!("dark"))].into_iter().collect());
        let store = ClientStore::with_inventory(ClientConfig::default(), frozen);
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.attach(tx);

        let theme = store.state("theme", Some(String::from("light"))).unwrap();
        assert_eq!(theme.get().unwrap().as_deref(), Some("dark"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn production_uses_matching_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let frozen = FrozenInventory::from_values([(name("theme"), json!("dark"))].into_iter().collect());
        LocalSnapshot::new(dir.path().join("snap.json"), frozen.fingerprint.clone())
            .save(&name("volume"), &json!(3))
            .unwrap();

        let store = production(&dir, frozen);
        let volume = store.state("volume", Some(10_u8)).unwrap();
        assert_eq!(volume.get().unwrap(), Some(3));

        // The inlined value wins over anything persisted.
        let theme = store.state("theme", Some(String::from("light"))).unwrap();
        assert_eq!(theme.get().unwrap().as_deref(), Some("dark"));
    }

    #[tokio::test(start_paused = true)]
    async fn production_ignores_snapshot_from_another_build() {
        let dir = tempfile::tempdir().unwrap();
        let stale = Fingerprint::of_names([&name("other")]);
        LocalSnapshot::new(dir.path().join("snap.json"), stale)
            .save(&name("volume"), &json!(3))
            .unwrap();

        let frozen = FrozenInventory::default();
        let fingerprint = frozen.fingerprint.clone();
        let store = production(&dir, frozen);
        let volume = store.state("volume", Some(10_u8)).unwrap();
        assert_eq!(volume.get().unwrap(), Some(10));
        settle().await;

        // The default was written through under the current fingerprint.
        let reloaded = LocalSnapshot::new(dir.path().join("snap.json"), fingerprint)
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.get(&name("volume")), Some(&json!(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn production_mutations_persist_locally() {
        let dir = tempfile::tempdir().unwrap();
        let frozen = FrozenInventory::default();
        let fingerprint = frozen.fingerprint.clone();
        let store = production(&dir, frozen);

        let volume = store.state("volume", Some(1_u8)).unwrap();
        volume.mutate(|v| v + 1);
        settle().await;

        let saved = LocalSnapshot::new(dir.path().join("snap.json"), fingerprint)
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.get(&name("volume")), Some(&json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn production_snapshot_keeps_newest_value() {
        let dir = tempfile::tempdir().unwrap();
        let frozen = FrozenInventory::default();
        let fingerprint = frozen.fingerprint.clone();
        let store = production(&dir, frozen);

        let volume = store.state("volume", Some(1_u8)).unwrap();
        volume.set(2).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        volume.set(3).unwrap();
        settle().await;

        let saved = LocalSnapshot::new(dir.path().join("snap.json"), fingerprint)
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.get(&name("volume")), Some(&json!(3)));
        assert_eq!(volume.get().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn write_failures_are_surfaced_as_events() {
        let (store, _rx) = attached();
        let mut events = store.events();

        store.handle_text(r#"{"type":"writeFailed","name":"counter","message":"disk full"}"#);
        store.handle_text("garbage");

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::WriteFailed {
                name: name("counter"),
                message: String::from("disk full"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_handle_cancels_pending_send() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        counter.set(4).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(counter);
        settle().await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.value(&name("counter")), Some(json!(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_sends() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        counter.set(4).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.shutdown();
        settle().await;

        assert!(drain(&mut rx).is_empty());
        assert!(!store.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_value_is_not_resent() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        store.apply(ServerMessage::Update {
            name: name("counter"),
            value: json!(6),
            sequence: Sequence(1),
        });
        counter.set(6).unwrap();
        settle().await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_value_during_debounce_is_not_overwritten() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        counter.set(5).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.apply(ServerMessage::Update {
            name: name("counter"),
            value: json!(9),
            sequence: Sequence(3),
        });
        settle().await;

        assert_eq!(counter.get().unwrap(), Some(9));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_send_uses_value_current_at_fire_time() {
        let (store, mut rx) = attached();
        let counter = store.state("counter", Some(0_i64)).unwrap();
        drain(&mut rx);

        counter.set(5).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.apply(ServerMessage::Update {
            name: name("counter"),
            value: json!(9),
            sequence: Sequence(3),
        });
        counter.mutate(|n| n + 1);
        settle().await;

        assert_eq!(counter.get().unwrap(), Some(10));
        assert_eq!(drain(&mut rx), vec![ClientMessage::update(name("counter"), json!(10))]);
    }

    #[tokio::test(start_paused = true)]
    async fn mutate_without_live_handle_is_rejected() {
        let (store, mut rx) = attached();

        let never_registered = store.mutate(&name("ghost"), Box::new(|_| Ok(json!(1))));
        assert!(matches!(never_registered, Err(ClientError::Unregistered(n)) if n == name("ghost")));

        drop(store.state::<i64>("released", None).unwrap());
        let released = store.mutate(&name("released"), Box::new(|_| Ok(json!(2))));
        assert!(matches!(released, Err(ClientError::Unregistered(_))));

        settle().await;
        assert_eq!(store.value(&name("ghost")), None);
        assert_eq!(store.value(&name("released")), None);
        assert!(drain(&mut rx).is_empty());
    }
}
