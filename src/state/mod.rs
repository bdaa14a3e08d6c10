//! # Observable State Store
//!
//! The `state` slot of a route context: a JSON-map value store with an
//! explicit subscribe/notify contract, decoupled from any rendering engine's
//! reactivity primitives.
//!
//! On the client this is the reactive container that descendant views read
//! from: reads take snapshots, writes notify every live subscription so the
//! dependent views re-render. On the server it is written once during context
//! initialization and serialized into the hydration payload.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

pub type JsonMap = Map<String, Value>;

/// Shared, observable JSON-map store.
///
/// Cloning is cheap and clones observe the same underlying map.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<JsonMap>>,
    notify: Arc<watch::Sender<u64>>,
}

impl StateStore {
    pub fn new(initial: JsonMap) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { inner: Arc::new(Mutex::new(initial)), notify: Arc::new(tx) }
    }

    /// Read a single key. Returns a clone so the lock is never held by callers.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner).get(key).cloned()
    }

    /// Write a single key and notify subscribers.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(%key, "state write");
        lock(&self.inner).insert(key, value);
        self.bump();
    }

    /// Apply a closure to the whole map under the lock, then notify once.
    /// Use this for multi-key transactions so subscribers see one change.
    pub fn update<F: FnOnce(&mut JsonMap)>(&self, mutate: F) {
        mutate(&mut lock(&self.inner));
        self.bump();
    }

    /// Full copy of the current map, e.g. for the hydration payload.
    pub fn snapshot(&self) -> JsonMap {
        lock(&self.inner).clone()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription { rx: self.notify.subscribe() }
    }

    fn bump(&self) {
        self.notify.send_modify(|version| *version += 1);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(JsonMap::new())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("state", &self.snapshot()).finish()
    }
}

/// One subscriber's view of the store's change feed.
pub struct StateSubscription {
    rx: watch::Receiver<u64>,
}

impl StateSubscription {
    /// Wait for the next committed write after the last one observed.
    /// Returns `false` if the store has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let store = StateStore::default();
        let mut sub = store.subscribe();

        store.set("count", json!(1));
        assert!(sub.changed().await);
        assert_eq!(store.get("count"), Some(json!(1)));
    }

    #[tokio::test]
    async fn update_notifies_once_per_transaction() {
        let store = StateStore::default();
        let mut sub = store.subscribe();

        store.update(|map| {
            map.insert("a".into(), json!(1));
            map.insert("b".into(), json!(2));
        });

        assert!(sub.changed().await);
        // No second notification pending for the single transaction.
        assert!(!sub.rx.has_changed().unwrap());
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let store = StateStore::new(JsonMap::new());
        let view = store.clone();
        store.set("user", json!("alice"));
        assert_eq!(view.get("user"), Some(json!("alice")));
    }
}
