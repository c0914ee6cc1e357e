//! Store export/import for restoring a show after a server restart.
//!
//! A snapshot holds the four shared records. The controller lease is runtime-only and
//! is left out, so after a restore the first stage instance to boot takes over.

use super::{paths, MemoryStore, SharedStore, StoreError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Schema version for snapshot format compatibility
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSnapshot {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    #[serde(default)]
    pub director: Option<Director>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub world: Option<World>,
    /// Vote ledger keyed by round, then entry id
    #[serde(default)]
    pub votes: BTreeMap<RoundId, BTreeMap<EntryId, VoteEntry>>,
}

impl StoreSnapshot {
    /// Decode the records out of a raw store tree, skipping ledger noise
    pub fn from_tree(root: &Value) -> Result<Self, StoreError> {
        let record = |path: &str| root.get(path).cloned();

        let director: Option<Director> = record(paths::DIRECTOR)
            .map(serde_json::from_value)
            .transpose()?;
        let session: Option<Session> = record(paths::SESSION)
            .map(serde_json::from_value)
            .transpose()?;
        let world: Option<World> = record(paths::WORLD)
            .map(serde_json::from_value)
            .transpose()?;

        let mut votes = BTreeMap::new();
        if let Some(Value::Object(rounds)) = root.get(paths::VOTES) {
            for (round_key, entries) in rounds {
                let Ok(round_id) = round_key.parse::<RoundId>() else {
                    tracing::warn!(round_key = %round_key, "Skipping non-numeric vote round");
                    continue;
                };
                let Some(entries) = entries.as_object() else {
                    continue;
                };
                let decoded: BTreeMap<EntryId, VoteEntry> = entries
                    .iter()
                    .filter_map(|(id, raw)| {
                        serde_json::from_value(raw.clone())
                            .ok()
                            .map(|entry| (id.clone(), entry))
                    })
                    .collect();
                votes.insert(round_id, decoded);
            }
        }

        Ok(Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            director,
            session,
            world,
            votes,
        })
    }

    /// Validate the snapshot before import
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(format!(
                "Snapshot schema version {} is newer than supported version {}. \
                 Please update the server.",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            ));
        }

        let round_id = self.session.as_ref().map(|s| s.round_id).unwrap_or(0);
        if let Some(ref session) = self.session {
            let timed = matches!(session.state, SessionState::Active | SessionState::Locked);
            if !timed && session.ends_at != 0 {
                return Err(format!(
                    "Session in {:?} must not carry endsAt",
                    session.state
                ));
            }
            if session.state != SessionState::Waiting && session.next_starts_at != 0 {
                return Err(format!(
                    "Session in {:?} must not carry nextStartsAt",
                    session.state
                ));
            }
            if session.state == SessionState::Active && session.round_id == 0 {
                return Err("Active session requires roundId > 0".to_string());
            }
        }

        if let Some(ref world) = self.world {
            if world.stability > MAX_STABILITY {
                return Err(format!(
                    "World stability {} is out of range",
                    world.stability
                ));
            }
        }

        for (vote_round, entries) in &self.votes {
            if *vote_round > round_id {
                return Err(format!(
                    "Votes reference round {} which is ahead of session round {}",
                    vote_round, round_id
                ));
            }
            for (entry_id, entry) in entries {
                if entry.power != entry.kind.power() {
                    return Err(format!(
                        "Vote '{}' has power {} for a {:?} vote",
                        entry_id, entry.power, entry.kind
                    ));
                }
            }
        }

        Ok(())
    }

    fn into_tree(self) -> Result<Map<String, Value>, StoreError> {
        let mut root = Map::new();
        if let Some(director) = self.director {
            root.insert(paths::DIRECTOR.to_string(), serde_json::to_value(director)?);
        }
        if let Some(session) = self.session {
            root.insert(paths::SESSION.to_string(), serde_json::to_value(session)?);
        }
        if let Some(world) = self.world {
            root.insert(paths::WORLD.to_string(), serde_json::to_value(world)?);
        }
        let mut votes = Map::new();
        for (round_id, entries) in self.votes {
            if !entries.is_empty() {
                votes.insert(round_id.to_string(), serde_json::to_value(entries)?);
            }
        }
        if !votes.is_empty() {
            root.insert(paths::VOTES.to_string(), Value::Object(votes));
        }
        Ok(root)
    }
}

impl MemoryStore {
    pub async fn export_snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        StoreSnapshot::from_tree(&self.dump().await)
    }

    /// Replace all shared records with the snapshot's contents
    pub async fn import_snapshot(&self, snapshot: StoreSnapshot) -> Result<(), StoreError> {
        snapshot.validate().map_err(StoreError::InvalidSnapshot)?;
        let mut root = snapshot.into_tree()?;
        // The running controller keeps its lease across an import
        if let Some(lease) = self.get(paths::CONTROLLER).await? {
            root.insert(paths::CONTROLLER.to_string(), lease);
        }
        self.replace_all(root).await;
        tracing::info!("Store snapshot imported");
        Ok(())
    }

    /// Write a snapshot next to `path` and move it into place
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.export_snapshot().await?;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Import the snapshot at `path`; returns `false` if no file exists yet
    pub async fn load_snapshot(&self, path: &Path) -> Result<bool, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        self.import_snapshot(snapshot).await?;
        Ok(true)
    }
}
