//! In-memory value cache with ordered subscriptions.
//!
//! [`StateStore`] is the per-process source of truth for reads. `set` is a
//! pure cache update: it never touches the medium or the network. It does
//! deliver the new value to every subscriber of the name, and it does so
//! while holding the store lock, so each subscriber sees every value
//! exactly once and in the order the values were set.
//!
//! Delivery goes through an unbounded channel per subscriber, which keeps
//! `set` non-blocking and lets a subscriber call back into the store
//! without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use mirrorstate_types::StateName;
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Listener<V> {
    id: u64,
    tx: mpsc::UnboundedSender<V>,
}

struct StoreInner<V> {
    values: HashMap<StateName, V>,
    listeners: HashMap<StateName, Vec<Listener<V>>>,
    next_listener: u64,
}

impl<V> StoreInner<V> {
    fn remove_listener(&mut self, name: &StateName, id: u64) {
        if let Some(list) = self.listeners.get_mut(name) {
            list.retain(|l| l.id != id);
            if list.is_empty() {
                self.listeners.remove(name);
            }
        }
    }
}

/// Mapping from state name to its current value.
pub struct StateStore<V> {
    inner: Arc<Mutex<StoreInner<V>>>,
}

impl<V: Clone> StateStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                values: HashMap::new(),
                listeners: HashMap::new(),
                next_listener: 0,
            })),
        }
    }

    /// Current value of a name.
    pub fn get(&self, name: &StateName) -> Option<V> {
        self.inner.lock().values.get(name).cloned()
    }

    /// Whether a value is cached for a name.
    pub fn contains(&self, name: &StateName) -> bool {
        self.inner.lock().values.contains_key(name)
    }

    /// Replace the value of a name and notify its subscribers.
    ///
    /// A `get` issued after `set` returns observes the new value.
    pub fn set(&self, name: StateName, value: V) {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.listeners.get_mut(&name) {
            list.retain(|listener| listener.tx.send(value.clone()).is_ok());
        }
        inner.values.insert(name, value);
    }

    /// Subscribe to every value subsequently set for a name.
    ///
    /// If the name already has a value it is delivered first, so a new
    /// subscriber never has to race a separate `get`.
    pub fn subscribe(&self, name: &StateName) -> Subscription<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_listener;
        inner.next_listener = inner.next_listener.wrapping_add(1);
        if let Some(current) = inner.values.get(name) {
            // The receiver is alive in this scope.
            let _ = tx.send(current.clone());
        }
        inner
            .listeners
            .entry(name.clone())
            .or_default()
            .push(Listener { id, tx });
        drop(inner);

        Subscription {
            name: name.clone(),
            id,
            rx,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers for a name.
    pub fn subscriber_count(&self, name: &StateName) -> usize {
        self.inner.lock().listeners.get(name).map_or(0, Vec::len)
    }

    /// All names with a cached value, sorted.
    pub fn names(&self) -> Vec<StateName> {
        let mut names: Vec<StateName> = self.inner.lock().values.keys().cloned().collect();
        names.sort();
        names
    }

    /// All cached entries, sorted by name.
    pub fn entries(&self) -> Vec<(StateName, V)> {
        let mut entries: Vec<(StateName, V)> = self
            .inner
            .lock()
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<V: Clone> Default for StateStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to one name. Dropping it unsubscribes.
pub struct Subscription<V> {
    name: StateName,
    id: u64,
    rx: mpsc::UnboundedReceiver<V>,
    store: Weak<Mutex<StoreInner<V>>>,
}

impl<V> Subscription<V> {
    /// The subscribed name.
    pub const fn name(&self) -> &StateName {
        &self.name
    }

    /// Wait for the next value. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<V> {
        self.rx.recv().await
    }

    /// Take the next value if one is already queued.
    pub fn try_recv(&mut self) -> Option<V> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving values.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.lock().remove_listener(&self.name, self.id);
        }
    }
}
