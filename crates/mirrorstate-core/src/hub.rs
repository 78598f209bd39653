//! Connection handling and fan-out.
//!
//! The [`Hub`] is the only writer of sequence numbers. It accepts
//! whole-value mutations from connections, persists them through the
//! [`Medium`], and announces them to every other connection. Changes the
//! watcher finds on the medium are run through the echo filter and, when
//! genuine, announced to every connection including the one that last
//! wrote the name.
//!
//! A mutation is announced only after its write succeeded. A failed write
//! leaves the sequence untouched and is reported to the submitting
//! connection as [`ServerMessage::WriteFailed`].
//!
//! # Ordering
//!
//! Sequencing, writing, caching, and broadcasting one change all happen
//! inside the name's critical section, so the broadcast channel carries
//! each name's changes in strictly increasing sequence order. Each
//! [`Connection`] also remembers the last sequence it delivered per name
//! and never forwards anything older.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use mirrorstate_types::{
    CanonicalJson, ClientMessage, ConnectionId, FrozenInventory, NamedState, Sequence,
    ServerMessage, StateName,
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::medium::{Medium, MediumError};
use crate::sequencer::{Observation, SequenceExhausted, Sequencer};
use crate::store::StateStore;
use crate::watcher::{Baseline, ChangeEvent, ChangeWatcher};

/// Buffered watcher events awaiting the hub.
const CHANGE_QUEUE: usize = 64;

/// Errors raised by the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The medium could not be loaded at start-up.
    #[error("failed to load medium: {0}")]
    Load(#[from] MediumError),

    /// A mutation could not be persisted and was not accepted.
    #[error("failed to persist {name}: {source}")]
    Write {
        /// State being written.
        name: StateName,
        /// The medium's error.
        source: MediumError,
    },

    /// The name's sequence counter cannot advance.
    #[error("sequence exhausted for {0}")]
    SequenceExhausted(StateName),
}

/// What happened to a submitted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Persisted and announced under a new sequence.
    Accepted(NamedState),
    /// Identical to the connection's previous message; dropped.
    Duplicate,
    /// Equal to the current value; nothing to persist.
    Unchanged(NamedState),
    /// An `init` message for a name that already has a value.
    AlreadyPresent(NamedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Update,
    FileChange,
}

#[derive(Debug, Clone)]
struct Announcement {
    origin: Option<ConnectionId>,
    kind: ChangeKind,
    state: NamedState,
}

/// Server-side owner of sequences, medium, and fan-out.
pub struct Hub<M> {
    medium: Arc<M>,
    store: StateStore<NamedState>,
    sequencer: Sequencer,
    baseline: Baseline,
    tx: broadcast::Sender<Announcement>,
}

impl<M: Medium> Hub<M> {
    /// Load every persisted state at sequence zero.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Load`] if the medium cannot be enumerated.
    pub async fn open(medium: Arc<M>, broadcast_capacity: usize) -> Result<Arc<Self>, HubError> {
        let values = medium.read_all().await?;
        let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
        let baseline = Baseline::from_values(&values);

        let store = StateStore::new();
        let sequencer = Sequencer::new();
        for (name, value) in values {
            sequencer.seed(name.clone(), CanonicalJson::of(&value));
            store.set(
                name.clone(),
                NamedState {
                    name,
                    value,
                    sequence: Sequence::ZERO,
                },
            );
        }

        info!(names = store.names().len(), "Hub loaded medium");
        Ok(Arc::new(Self {
            medium,
            store,
            sequencer,
            baseline,
            tx,
        }))
    }

    /// A watcher over this hub's medium whose baseline tracks every value
    /// the hub accepts.
    pub fn watcher(&self, interval: Duration) -> ChangeWatcher<M> {
        ChangeWatcher::sharing(Arc::clone(&self.medium), interval, self.baseline.clone())
    }

    /// Start watching the medium for external changes.
    ///
    /// Only edits that leave the medium different from what the hub
    /// accepted are reported. Both the watcher and the task feeding its
    /// events into the hub stop when `cancel` fires.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let watcher = self.watcher(interval);

        let (tx, mut rx) = mpsc::channel(CHANGE_QUEUE);
        watcher.spawn(tx, cancel);

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub.on_medium_change(event).await;
            }
            debug!("Change feed closed");
        })
    }

    /// The backing medium.
    pub const fn medium(&self) -> &Arc<M> {
        &self.medium
    }

    /// Most recently accepted state of a name.
    pub fn get(&self, name: &StateName) -> Option<NamedState> {
        self.store.get(name)
    }

    /// Every known state, sorted by name.
    pub fn snapshot(&self) -> Vec<NamedState> {
        self.store.entries().into_iter().map(|(_, state)| state).collect()
    }

    /// Every known name, sorted.
    pub fn enumerate_names(&self) -> Vec<StateName> {
        self.store.names()
    }

    /// Freeze the current inventory for embedding in a build.
    pub fn freeze(&self) -> FrozenInventory {
        FrozenInventory::from_values(
            self.store
                .entries()
                .into_iter()
                .map(|(name, state)| (name, state.value))
                .collect(),
        )
    }

    /// Number of connections currently subscribed to fan-out.
    pub fn connection_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Register a new connection in the `Connecting` state.
    pub fn connect(self: &Arc<Self>) -> Connection<M> {
        let id = ConnectionId::new();
        debug!(connection = %id, "Connection registered");
        Connection {
            id,
            hub: Arc::clone(self),
            rx: self.tx.subscribe(),
            state: ConnectionState::Connecting,
            last_seen: HashMap::new(),
            last_message: None,
            backlog: VecDeque::new(),
        }
    }

    /// Create a name with a default value unless it already exists.
    ///
    /// Returns the name's state after the call, whichever value won.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Write`] if the default could not be persisted.
    pub async fn materialize(
        &self,
        name: StateName,
        default: Value,
    ) -> Result<NamedState, HubError> {
        let msg = ClientMessage::init(name, default);
        match self.submit(None, &msg).await? {
            SubmitOutcome::Accepted(state)
            | SubmitOutcome::Unchanged(state)
            | SubmitOutcome::AlreadyPresent(state) => Ok(state),
            SubmitOutcome::Duplicate => Ok(self.current_or(&msg, Sequence::ZERO)),
        }
    }

    fn current_or(&self, msg: &ClientMessage, sequence: Sequence) -> NamedState {
        self.store.get(&msg.name).unwrap_or_else(|| NamedState {
            name: msg.name.clone(),
            value: msg.value.clone(),
            sequence,
        })
    }

    fn announce(&self, origin: Option<ConnectionId>, kind: ChangeKind, state: NamedState) {
        // Errs only when no connection is subscribed.
        let receivers = self
            .tx
            .send(Announcement {
                origin,
                kind,
                state,
            })
            .unwrap_or(0);
        debug!(receivers, ?kind, "Change announced");
    }

    /// Sequence, persist, and announce a mutation.
    async fn submit(
        &self,
        origin: Option<ConnectionId>,
        msg: &ClientMessage,
    ) -> Result<SubmitOutcome, HubError> {
        let name = &msg.name;
        let canonical = CanonicalJson::of(&msg.value);
        let mut slot = self.sequencer.lock(name).await;

        if msg.init && slot.has_value() {
            return Ok(SubmitOutcome::AlreadyPresent(
                self.current_or(msg, slot.sequence()),
            ));
        }
        if slot.is_current(&canonical) {
            return Ok(SubmitOutcome::Unchanged(self.current_or(msg, slot.sequence())));
        }
        if slot.sequence().next().is_none() {
            return Err(HubError::SequenceExhausted(name.clone()));
        }

        let previous = slot.begin_own_write(&canonical);
        if let Err(source) = self.medium.write(name, &msg.value).await {
            slot.abort_own_write(previous);
            warn!(name = %name, error = %source, "Medium write failed, mutation not announced");
            return Err(HubError::Write {
                name: name.clone(),
                source,
            });
        }
        let sequence = slot
            .commit_own_write(canonical.clone())
            .map_err(|SequenceExhausted| HubError::SequenceExhausted(name.clone()))?;
        self.baseline.record(name.clone(), canonical);

        let state = NamedState {
            name: name.clone(),
            value: msg.value.clone(),
            sequence,
        };
        self.store.set(name.clone(), state.clone());
        self.announce(origin, ChangeKind::Update, state.clone());
        drop(slot);

        debug!(name = %name, %sequence, origin = ?origin, "Mutation accepted");
        Ok(SubmitOutcome::Accepted(state))
    }

    /// Handle a change reported by the watcher.
    ///
    /// The name is re-read inside its critical section so the decision is
    /// made against what the medium holds now, not what it held when the
    /// watcher scanned. Returns the new sequence if the change was
    /// genuine and announced.
    pub async fn on_medium_change(&self, event: ChangeEvent) -> Option<Sequence> {
        let ChangeEvent { name, value } = event;
        let mut slot = self.sequencer.lock(&name).await;

        let current = match self.medium.read(&name).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(name = %name, "Changed entry vanished before re-read");
                return None;
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Re-read failed, using scanned content");
                value
            }
        };

        let canonical = CanonicalJson::of(&current);
        self.baseline.record(name.clone(), canonical.clone());

        match slot.observe_medium(&canonical) {
            Ok(Observation::Echo) => {
                debug!(name = %name, "Suppressed echo of own write");
                None
            }
            Ok(Observation::Unchanged) => None,
            Ok(Observation::External(sequence)) => {
                let state = NamedState {
                    name: name.clone(),
                    value: current,
                    sequence,
                };
                self.store.set(name.clone(), state.clone());
                self.announce(None, ChangeKind::FileChange, state);
                info!(name = %name, %sequence, "External change accepted");
                Some(sequence)
            }
            Err(SequenceExhausted) => {
                error!(name = %name, "Sequence exhausted, external change dropped");
                None
            }
        }
    }
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered; initial snapshot not yet sent.
    Connecting,
    /// Exchanging messages.
    Open,
    /// Disconnected; nothing more is sent or accepted.
    Closed,
}

/// One client channel attached to a [`Hub`].
pub struct Connection<M> {
    id: ConnectionId,
    hub: Arc<Hub<M>>,
    rx: broadcast::Receiver<Announcement>,
    state: ConnectionState,
    last_seen: HashMap<StateName, Sequence>,
    last_message: Option<(StateName, CanonicalJson)>,
    backlog: VecDeque<ServerMessage>,
}

impl<M: Medium> Connection<M> {
    /// This connection's identifier.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `Open` and produce the initial snapshot.
    ///
    /// Returns one `initialState` per known name. Calling it again after
    /// the connection opened returns nothing.
    pub fn open(&mut self) -> Vec<ServerMessage> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Open;
        let snapshot = self.hub.snapshot();
        info!(connection = %self.id, names = snapshot.len(), "Connection open");
        snapshot
            .into_iter()
            .map(|state| self.initial_state(state))
            .collect()
    }

    /// Parse and handle one text frame.
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Dropping malformed message");
                Vec::new()
            }
        }
    }

    /// Handle one mutation and return the replies for this connection.
    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        let name = msg.name.clone();
        match self.submit(msg).await {
            Ok(SubmitOutcome::AlreadyPresent(state)) => vec![self.initial_state(state)],
            Ok(_) => Vec::new(),
            Err(e) => vec![ServerMessage::WriteFailed {
                name,
                message: e.to_string(),
            }],
        }
    }

    /// Submit a mutation on behalf of this connection.
    ///
    /// An identical `(name, value)` pair sent twice in a row is dropped
    /// as [`SubmitOutcome::Duplicate`]. The check is per connection, so
    /// two connections may send the same value independently.
    ///
    /// # Errors
    ///
    /// Returns the hub's error if the mutation was not persisted.
    pub async fn submit(&mut self, msg: ClientMessage) -> Result<SubmitOutcome, HubError> {
        if self.state != ConnectionState::Open {
            debug!(connection = %self.id, state = ?self.state, "Ignoring message on inactive connection");
            return Ok(SubmitOutcome::Duplicate);
        }

        let key = (msg.name.clone(), CanonicalJson::of(&msg.value));
        if self.last_message.as_ref() == Some(&key) {
            debug!(connection = %self.id, name = %msg.name, "Skipping duplicate message");
            return Ok(SubmitOutcome::Duplicate);
        }

        match self.hub.submit(Some(self.id), &msg).await {
            Ok(outcome) => {
                if let SubmitOutcome::Accepted(state) = &outcome {
                    self.last_seen.insert(state.name.clone(), state.sequence);
                }
                self.last_message = Some(key);
                Ok(outcome)
            }
            Err(e) => {
                self.last_message = None;
                Err(e)
            }
        }
    }

    /// Wait for the next message to push to this client.
    ///
    /// Skips this connection's own mutations and anything at or below the
    /// last sequence already delivered for a name. If the connection fell
    /// too far behind the broadcast channel it is resynchronized with a
    /// fresh `initialState` for every name that moved. Returns `None` once
    /// the connection is closed or the hub is gone.
    ///
    /// Cancel safe: dropping the future loses no message.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            if self.state == ConnectionState::Closed {
                return None;
            }
            if let Some(msg) = self.backlog.pop_front() {
                return Some(msg);
            }
            match self.rx.recv().await {
                Ok(announcement) => {
                    if let Some(msg) = self.forward(announcement) {
                        return Some(msg);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(connection = %self.id, skipped, "Connection lagged, resynchronizing");
                    self.resync();
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Close the connection and discard its dedupe and echo state.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.last_seen.clear();
        self.last_message = None;
        self.backlog.clear();
        info!(connection = %self.id, "Connection closed");
    }

    fn initial_state(&mut self, state: NamedState) -> ServerMessage {
        self.last_seen.insert(state.name.clone(), state.sequence);
        ServerMessage::InitialState {
            name: state.name,
            value: state.value,
            sequence: state.sequence,
        }
    }

    fn forward(&mut self, announcement: Announcement) -> Option<ServerMessage> {
        if announcement.origin == Some(self.id) {
            return None;
        }
        let NamedState {
            name,
            value,
            sequence,
        } = announcement.state;
        if self.last_seen.get(&name).is_some_and(|seen| *seen >= sequence) {
            return None;
        }
        self.last_seen.insert(name.clone(), sequence);
        Some(match announcement.kind {
            ChangeKind::Update => ServerMessage::Update {
                name,
                value,
                sequence,
            },
            ChangeKind::FileChange => ServerMessage::FileChange {
                name,
                value,
                sequence,
            },
        })
    }

    fn resync(&mut self) {
        for state in self.hub.snapshot() {
            let behind = self
                .last_seen
                .get(&state.name)
                .is_none_or(|seen| *seen < state.sequence);
            if behind {
                let msg = self.initial_state(state);
                self.backlog.push_back(msg);
            }
        }
    }
}
