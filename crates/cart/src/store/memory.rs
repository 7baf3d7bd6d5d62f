//! In-process realtime store.
//!
//! Behaves like the hosted store from the cart's point of view: every
//! subscription gets the current value immediately and a full snapshot after
//! each write touching its path. Also records every primitive call in a
//! journal and can be told to fail, which the tests lean on.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::{RemoteStore, StoreError, StoreEvent, StorePath, StoreSubscription, tree};

/// A primitive call received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Subscribe(StorePath),
    Update(StorePath, Map<String, Value>),
    Push(StorePath, Value),
    Remove(StorePath),
}

impl StoreOp {
    /// Whether the call modifies stored data.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(self, Self::Subscribe(_))
    }

    /// Path the call targeted.
    #[must_use]
    pub const fn path(&self) -> &StorePath {
        match self {
            Self::Subscribe(p) | Self::Update(p, _) | Self::Push(p, _) | Self::Remove(p) => p,
        }
    }
}

/// In-memory [`RemoteStore`].
///
/// Cheaply cloneable; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    root: Value,
    listeners: Vec<Listener>,
    journal: Vec<StoreOp>,
    fail_writes: Option<String>,
    fail_subscribe: Option<String>,
}

struct Listener {
    path: StorePath,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        // A panic while holding the lock leaves the tree in a consistent state
        // (every mutation is a single tree operation), so poisoning is ignored.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the value at `path` directly, as another device would.
    ///
    /// Not recorded in the journal. Subscribers are notified.
    pub fn put(&self, path: &StorePath, value: Value) {
        let mut inner = self.lock();
        tree::set(&mut inner.root, path.segments(), value);
        inner.notify(path);
    }

    /// Current value at `path`.
    #[must_use]
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        tree::get(&self.lock().root, path.segments()).cloned()
    }

    /// Every primitive call received so far, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<StoreOp> {
        self.lock().journal.clone()
    }

    /// Only the calls that modify data.
    #[must_use]
    pub fn writes(&self) -> Vec<StoreOp> {
        self.lock()
            .journal
            .iter()
            .filter(|op| op.is_write())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Make every subsequent write fail with `reason` (or succeed again with
    /// `None`).
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.lock().fail_writes = reason.map(String::from);
    }

    /// Make every subsequent subscribe fail with `reason` (or succeed again
    /// with `None`).
    pub fn fail_subscriptions(&self, reason: Option<&str>) {
        self.lock().fail_subscribe = reason.map(String::from);
    }

    /// End every open subscription on `path` with an error, as when the
    /// hosted store revokes read access.
    pub fn cancel_subscriptions(&self, path: &StorePath, reason: &str) {
        let mut inner = self.lock();
        inner.listeners.retain(|listener| {
            if listener.path.overlaps(path) {
                let _ = listener
                    .tx
                    .send(Err(StoreError::Cancelled(reason.to_string())));
                false
            } else {
                true
            }
        });
    }

    /// Number of subscriptions whose receiving side is still alive.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        let mut inner = self.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }
}

impl MemoryStoreInner {
    fn check_writable(&self) -> Result<(), StoreError> {
        self.fail_writes
            .as_ref()
            .map_or(Ok(()), |reason| Err(StoreError::Injected(reason.clone())))
    }

    fn notify(&mut self, changed: &StorePath) {
        let root = &self.root;
        self.listeners.retain(|listener| {
            if !listener.path.overlaps(changed) {
                return !listener.tx.is_closed();
            }
            let snapshot = tree::get(root, listener.path.segments()).cloned();
            listener.tx.send(Ok(snapshot)).is_ok()
        });
    }
}

impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &StorePath) -> Result<StoreSubscription, StoreError> {
        let mut inner = self.lock();
        inner.journal.push(StoreOp::Subscribe(path.clone()));
        if let Some(reason) = &inner.fail_subscribe {
            return Err(StoreError::Injected(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = tree::get(&inner.root, path.segments()).cloned();
        // The receiver is alive, so the initial snapshot cannot be refused.
        let _ = tx.send(Ok(initial));
        inner.listeners.push(Listener {
            path: path.clone(),
            tx,
        });
        debug!(%path, "memory store subscription opened");
        Ok(StoreSubscription::new(path.clone(), rx))
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.journal.push(StoreOp::Update(path.clone(), fields.clone()));
        inner.check_writable()?;
        tree::merge(&mut inner.root, path.segments(), fields);
        inner.notify(path);
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.journal.push(StoreOp::Push(path.clone(), value.clone()));
        inner.check_writable()?;
        let key = format!("-{}", uuid::Uuid::new_v4().simple());
        let child = path.child(&key)?;
        tree::set(&mut inner.root, child.segments(), value);
        inner.notify(&child);
        Ok(key)
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.journal.push(StoreOp::Remove(path.clone()));
        inner.check_writable()?;
        if tree::get(&inner.root, path.segments()).is_some() {
            tree::set(&mut inner.root, path.segments(), Value::Null);
            inner.notify(path);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(p: &str) -> StorePath {
        StorePath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = MemoryStore::new();
        store.put(&path("carts/u1/a"), json!({"quantity": 1}));

        let mut sub = store.subscribe(&path("carts/u1")).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first, Some(json!({"a": {"quantity": 1}})));
    }

    #[tokio::test]
    async fn test_subscribe_to_absent_path_delivers_none() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&path("carts/nobody")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_writes_fan_out_full_snapshots() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&path("carts/u1")).await.unwrap();
        let _ = sub.next().await;

        let key = store
            .push(&path("carts/u1"), json!({"quantity": 1}))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap().unwrap();
        assert_eq!(snapshot[&key]["quantity"], json!(1));

        let mut fields = Map::new();
        fields.insert("quantity".into(), json!(3));
        store
            .update(&path("carts/u1").child(&key).unwrap(), fields)
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap().unwrap();
        assert_eq!(snapshot[&key]["quantity"], json!(3));
        assert_eq!(snapshot.as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_writes_are_not_delivered() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&path("carts/u1")).await.unwrap();
        let _ = sub.next().await;

        store.put(&path("carts/u2/x"), json!({"quantity": 1}));
        store.put(&path("carts/u1/y"), json!({"quantity": 2}));

        let snapshot = sub.next().await.unwrap().unwrap();
        assert_eq!(snapshot, Some(json!({"y": {"quantity": 2}})));
    }

    #[tokio::test]
    async fn test_remove_absent_path_is_silent() {
        let store = MemoryStore::new();
        store.remove(&path("carts/u1/missing")).await.unwrap();
        assert_eq!(store.writes(), vec![StoreOp::Remove(path("carts/u1/missing"))]);
    }

    #[tokio::test]
    async fn test_injected_write_failure_leaves_data_untouched() {
        let store = MemoryStore::new();
        store.put(&path("carts/u1/a"), json!({"quantity": 1}));
        store.fail_writes(Some("offline"));

        let err = store.remove(&path("carts/u1/a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        assert_eq!(store.get(&path("carts/u1/a")), Some(json!({"quantity": 1})));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let store = MemoryStore::new();
        let sub = store.subscribe(&path("carts/u1")).await.unwrap();
        assert_eq!(store.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_subscription_with_error() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(&path("carts/u1")).await.unwrap();
        let _ = sub.next().await;

        store.cancel_subscriptions(&path("carts/u1"), "permission denied");
        assert!(matches!(
            sub.next().await,
            Some(Err(StoreError::Cancelled(_)))
        ));
        assert!(sub.next().await.is_none());
    }
}
