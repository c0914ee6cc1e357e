//! The shared realtime key-value store every screen reads and writes.
//!
//! Records are JSON values addressed by `/`-separated paths. Writers get
//! last-write-wins semantics per path; subscribers are notified of every change at,
//! above, or below the path they watch. The only atomic read-modify-write is
//! [`SharedStore::compare_and_swap`].

mod memory;
pub mod snapshot;

pub use memory::MemoryStore;

use crate::types::{RoundId, VoteEntry};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Well-known record paths
pub mod paths {
    use crate::types::RoundId;

    pub const DIRECTOR: &str = "director";
    pub const SESSION: &str = "session";
    pub const WORLD: &str = "world";
    pub const VOTES: &str = "votes";
    pub const CONTROLLER: &str = "controller";

    /// Ledger subtree for one round
    pub fn round_votes(round_id: RoundId) -> String {
        format!("{VOTES}/{round_id}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("Cannot write below non-object value at {0:?}")]
    NotAnObject(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot rejected: {0}")]
    InvalidSnapshot(String),
}

/// A single applied write, as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Path the write targeted
    pub path: String,
    /// Value at `path` after the write (`None` once removed)
    pub value: Option<Value>,
    /// Store revision after the write
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Changed(Change),
    /// The subscriber fell behind and missed this many changes; re-read what you need
    Lagged(u64),
}

/// Change feed filtered to one path
pub struct Subscription {
    prefix: String,
    rx: broadcast::Receiver<Change>,
}

impl Subscription {
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<Change>) -> Self {
        Self {
            prefix: prefix.into(),
            rx,
        }
    }

    /// Next relevant notification, `None` once the store is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if paths_overlap(&self.prefix, &change.path) {
                        return Some(Notification::Changed(change));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(prefix = %self.prefix, missed, "Store subscriber lagged");
                    return Some(Notification::Lagged(missed));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// True if a write at one path can affect a watcher of the other
pub fn paths_overlap(a: &str, b: &str) -> bool {
    fn below(child: &str, parent: &str) -> bool {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
    }
    a.is_empty() || b.is_empty() || a == b || below(a, b) || below(b, a)
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`; `Value::Null` removes it
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path`; `Value::Null` fields are removed
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append `value` under a freshly generated key and return that key
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Write `new` only if the current value equals `expected`; `None` means absent
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<Value>,
        new: Value,
    ) -> Result<bool, StoreError>;

    fn subscribe(&self, path: &str) -> Subscription;
}

/// Read and decode a record
pub async fn read<T: DeserializeOwned>(
    store: &dyn SharedStore,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Read a record, falling back to its default when absent
pub async fn read_or_default<T: DeserializeOwned + Default>(
    store: &dyn SharedStore,
    path: &str,
) -> Result<T, StoreError> {
    Ok(read(store, path).await?.unwrap_or_default())
}

/// Encode and replace a record
pub async fn write<T: Serialize + Sync + ?Sized>(
    store: &dyn SharedStore,
    path: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value)?;
    store.set(path, value).await
}

/// Point-in-time snapshot of one round's ledger, skipping entries that do not decode
pub async fn read_round_votes(
    store: &dyn SharedStore,
    round_id: RoundId,
) -> Result<Vec<(String, VoteEntry)>, StoreError> {
    let Some(Value::Object(entries)) = store.get(&paths::round_votes(round_id)).await? else {
        return Ok(Vec::new());
    };

    let mut votes = Vec::with_capacity(entries.len());
    for (entry_id, raw) in entries {
        match serde_json::from_value::<VoteEntry>(raw) {
            Ok(entry) => votes.push((entry_id, entry)),
            Err(e) => {
                tracing::warn!(round_id, entry_id = %entry_id, "Skipping malformed vote entry: {}", e);
            }
        }
    }
    Ok(votes)
}
