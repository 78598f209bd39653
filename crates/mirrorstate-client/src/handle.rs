//! Typed per-name handles.
//!
//! The wire carries untyped JSON; a [`StateHandle<T>`] binds one name to
//! a concrete Rust type at the call site and converts at the edges.

use std::marker::PhantomData;

use mirrorstate_core::Subscription;
use mirrorstate_types::StateName;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::ClientError;
use crate::store::ClientStore;

/// A consumer's view of one named state.
///
/// Dropping the last handle for a name cancels its pending send.
pub struct StateHandle<T> {
    store: ClientStore,
    name: StateName,
    _value: PhantomData<fn() -> T>,
}

impl<T> StateHandle<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    pub(crate) const fn new(store: ClientStore, name: StateName) -> Self {
        Self {
            store,
            name,
            _value: PhantomData,
        }
    }

    /// The state's name.
    pub const fn name(&self) -> &StateName {
        &self.name
    }

    /// Current value, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if the stored value does not
    /// fit `T`.
    pub fn get(&self) -> Result<Option<T>, ClientError> {
        Ok(self
            .store
            .value(&self.name)
            .map(serde_json::from_value)
            .transpose()?)
    }

    /// Queue an update computed from the current value.
    ///
    /// The updater receives its own copy and never sees a value being
    /// reconciled underneath it. Updates queued in the same turn are
    /// applied in order and sent as one message.
    pub fn mutate<F>(&self, updater: F)
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        // A live handle keeps the name registered.
        if let Err(e) = self.store.mutate(
            &self.name,
            Box::new(move |value| {
                let current: T = serde_json::from_value(value)?;
                Ok(serde_json::to_value(updater(current))?)
            }),
        ) {
            warn!(name = %self.name, error = %e, "Mutation rejected");
        }
    }

    /// Queue a replacement value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if `value` cannot be
    /// serialized.
    pub fn set(&self, value: T) -> Result<(), ClientError> {
        let value = serde_json::to_value(value)?;
        self.store.mutate(&self.name, Box::new(move |_| Ok(value)))
    }

    /// Subscribe to the state's values, starting with the current one.
    pub fn subscribe(&self) -> TypedSubscription<T> {
        TypedSubscription {
            inner: self.store.subscribe(&self.name),
            _value: PhantomData,
        }
    }
}

impl<T> Drop for StateHandle<T> {
    fn drop(&mut self) {
        self.store.release(&self.name);
    }
}

/// Stream of typed values for one name.
///
/// Values that do not fit `T` are logged and skipped.
pub struct TypedSubscription<T> {
    inner: Subscription<Value>,
    _value: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscription<T> {
    /// Wait for the next value. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let value = self.inner.recv().await?;
            if let Some(typed) = self.decode(value) {
                return Some(typed);
            }
        }
    }

    /// Take the next value if one is already waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        while let Some(value) = self.inner.try_recv() {
            if let Some(typed) = self.decode(value) {
                return Some(typed);
            }
        }
        None
    }

    fn decode(&self, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(name = %self.inner.name(), error = %e, "Skipping value of unexpected shape");
                None
            }
        }
    }
}
