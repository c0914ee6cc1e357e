use super::{Change, SharedStore, StoreError, Subscription};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// In-process realtime store shared by every connection of the relay
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: RwLock<Value>,
    changes: broadcast::Sender<Change>,
    revision: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(Value::Object(Map::new())),
                changes: tx,
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Number of writes applied so far
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    /// Clone of the whole tree
    pub async fn dump(&self) -> Value {
        self.inner.root.read().await.clone()
    }

    /// Replace the whole tree (snapshot import), notifying every subscriber
    pub async fn replace_all(&self, root: Map<String, Value>) {
        let mut guard = self.inner.root.write().await;
        *guard = Value::Object(root);
        self.notify("", &guard);
    }

    /// Must be called with the write lock held so notifications follow apply order
    fn notify(&self, path: &str, root: &Value) {
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let value = segments(path)
            .ok()
            .and_then(|segs| lookup(root, &segs).cloned());
        // No receivers is fine
        let _ = self.inner.changes.send(Change {
            path: path.to_string(),
            value,
            revision,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let segs: Vec<&str> = path.split('/').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segs)
}

/// Non-root path split into parent segments and the final key
fn split_leaf(path: &str) -> Result<(Vec<&str>, &str), StoreError> {
    let mut segs = segments(path)?;
    let leaf = segs
        .pop()
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
    Ok((segs, leaf))
}

fn lookup<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(*seg)?;
    }
    Some(node)
}

/// Object at `segs`, creating empty objects along the way
fn object_at<'a>(
    root: &'a mut Value,
    segs: &[&str],
    path: &str,
) -> Result<&'a mut Map<String, Value>, StoreError> {
    let mut node = root;
    for seg in segs {
        let map = node
            .as_object_mut()
            .ok_or_else(|| StoreError::NotAnObject(path.to_string()))?;
        node = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    node.as_object_mut()
        .ok_or_else(|| StoreError::NotAnObject(path.to_string()))
}

/// Remove the value at `segs`, pruning parents left empty. Returns whether anything changed.
fn remove_at(node: &mut Value, segs: &[&str]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match segs {
        [] => false,
        [leaf] => map.remove(*leaf).is_some(),
        [first, rest @ ..] => {
            let Some(child) = map.get_mut(*first) else {
                return false;
            };
            let removed = remove_at(child, rest);
            if removed && child.as_object().is_some_and(|m| m.is_empty()) {
                map.remove(*first);
            }
            removed
        }
    }
}

fn set_at(root: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let (parents, leaf) = split_leaf(path)?;
    if value.is_null() {
        let mut segs = parents;
        segs.push(leaf);
        remove_at(root, &segs);
        return Ok(());
    }
    object_at(root, &parents, path)?.insert(leaf.to_string(), value);
    Ok(())
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segs = segments(path)?;
        let root = self.inner.root.read().await;
        Ok(lookup(&root, &segs).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut root = self.inner.root.write().await;
        set_at(&mut root, path, value)?;
        self.notify(path, &root);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let segs = segments(path)?;
        if segs.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut root = self.inner.root.write().await;
        let target = object_at(&mut root, &segs, path)?;
        for (key, value) in fields {
            if value.is_null() {
                target.remove(&key);
            } else {
                target.insert(key, value);
            }
        }
        if target.is_empty() {
            remove_at(&mut root, &segs);
        }
        self.notify(path, &root);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = ulid::Ulid::new().to_string();
        let child = format!("{path}/{key}");
        self.set(&child, value).await?;
        Ok(key)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let segs = segments(path)?;
        if segs.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let mut root = self.inner.root.write().await;
        if remove_at(&mut root, &segs) {
            self.notify(path, &root);
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let segs = segments(path)?;
        let mut root = self.inner.root.write().await;
        if lookup(&root, &segs) != expected.as_ref() {
            return Ok(false);
        }
        set_at(&mut root, path, new)?;
        self.notify(path, &root);
        Ok(true)
    }

    fn subscribe(&self, path: &str) -> Subscription {
        Subscription::new(path, self.inner.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Notification;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get_nested() {
        let store = MemoryStore::new();
        store.set("votes/1/a", json!({"power": 1})).await.unwrap();

        assert_eq!(
            store.get("votes/1/a").await.unwrap(),
            Some(json!({"power": 1}))
        );
        assert_eq!(
            store.get("votes").await.unwrap(),
            Some(json!({"1": {"a": {"power": 1}}}))
        );
        assert_eq!(store.get("world").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .set("session", json!({"state": "waiting", "roundId": 2}))
            .await
            .unwrap();
        store
            .update("session", fields(json!({"state": "active", "endsAt": 10})))
            .await
            .unwrap();

        assert_eq!(
            store.get("session").await.unwrap(),
            Some(json!({"state": "active", "roundId": 2, "endsAt": 10}))
        );
    }

    #[tokio::test]
    async fn test_push_generates_distinct_keys() {
        let store = MemoryStore::new();
        let a = store.push("votes/3", json!({"n": 1})).await.unwrap();
        let b = store.push("votes/3", json!({"n": 2})).await.unwrap();

        assert_ne!(a, b);
        let round = store.get("votes/3").await.unwrap().unwrap();
        assert_eq!(round.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.set("votes/1/a", json!(1)).await.unwrap();
        store.set("director", json!({"mode": "normal"})).await.unwrap();

        store.remove("votes/1/a").await.unwrap();

        assert_eq!(store.get("votes").await.unwrap(), None);
        assert_eq!(store.dump().await, json!({"director": {"mode": "normal"}}));
    }

    #[tokio::test]
    async fn test_set_null_removes() {
        let store = MemoryStore::new();
        store.set("world", json!({"stability": 70})).await.unwrap();
        store.set("world", Value::Null).await.unwrap();
        assert_eq!(store.get("world").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();

        assert!(store
            .compare_and_swap("controller", None, json!({"holder": "a"}))
            .await
            .unwrap());
        // Second claimer expected an empty slot and loses
        assert!(!store
            .compare_and_swap("controller", None, json!({"holder": "b"}))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap(
                "controller",
                Some(json!({"holder": "a"})),
                json!({"holder": "b"})
            )
            .await
            .unwrap());

        assert_eq!(
            store.get("controller").await.unwrap(),
            Some(json!({"holder": "b"}))
        );
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set("votes//a", json!(1)).await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.set("", json!(1)).await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.remove("").await,
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_write_below_scalar_fails() {
        let store = MemoryStore::new();
        store.set("world", json!(5)).await.unwrap();
        assert!(matches!(
            store.set("world/stability", json!(1)).await,
            Err(StoreError::NotAnObject(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribers_see_related_paths_only() {
        let store = MemoryStore::new();
        let mut session_sub = store.subscribe("session");
        let mut votes_sub = store.subscribe("votes");

        store.set("votes/1/a", json!(1)).await.unwrap();
        store.set("session", json!({"state": "active"})).await.unwrap();

        match votes_sub.recv().await {
            Some(Notification::Changed(change)) => {
                assert_eq!(change.path, "votes/1/a");
                assert_eq!(change.value, Some(json!(1)));
            }
            other => panic!("Expected vote change, got {:?}", other),
        }
        match session_sub.recv().await {
            Some(Notification::Changed(change)) => {
                assert_eq!(change.path, "session");
                assert_eq!(change.revision, 2);
            }
            other => panic!("Expected session change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revision_counts_writes() {
        let store = MemoryStore::new();
        assert_eq!(store.revision(), 0);
        store.set("director", json!({})).await.unwrap();
        store.remove("director").await.unwrap();
        // Removing something absent is not a write
        store.remove("director").await.unwrap();
        assert_eq!(store.revision(), 2);
    }

    #[tokio::test]
    async fn test_replace_all_notifies_root() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("world");
        store
            .replace_all(fields(json!({"world": {"stability": 12}})))
            .await;

        match sub.recv().await {
            Some(Notification::Changed(change)) => assert_eq!(change.path, ""),
            other => panic!("Expected root change, got {:?}", other),
        }
        assert_eq!(
            store.get("world/stability").await.unwrap(),
            Some(json!(12))
        );
    }
}
