//! Device-local voting state: identity, cooldown, and the last round voted per kind.

use super::gate::{entry_for, round_accepts_votes, SubmitError, VoteRejection};
use crate::clock::Millis;
use crate::store::{self, paths, SharedStore, StoreError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Random identifier for a device that has none yet
pub fn new_device_id() -> DeviceId {
    hex::encode(rand::random::<u128>().to_be_bytes())
}

/// What a device remembers between page loads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub device_id: DeviceId,
    #[serde(default)]
    pub last_vote_at: Millis,
    #[serde(default)]
    pub last_normal_round: RoundId,
    #[serde(default)]
    pub last_ability_round: RoundId,
}

impl DeviceProfile {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            last_vote_at: 0,
            last_normal_round: 0,
            last_ability_round: 0,
        }
    }

    /// Load the profile at `path`, creating and saving a fresh one if missing
    pub async fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let profile = Self::new(new_device_id());
                profile.save(path).await?;
                tracing::info!(device_id = %profile.device_id, "Created device profile");
                Ok(profile)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        tokio::fs::write(path, serde_json::to_vec(self)?).await?;
        Ok(())
    }

    pub fn last_round(&self, kind: VoteKind) -> RoundId {
        match kind {
            VoteKind::Normal => self.last_normal_round,
            VoteKind::Ability => self.last_ability_round,
        }
    }
}

/// One audience device applying the voting contract before it writes
#[derive(Debug, Clone)]
pub struct VoterDevice {
    profile: DeviceProfile,
    role: AudienceRole,
    cooldown: Duration,
}

impl VoterDevice {
    pub fn new(profile: DeviceProfile, cooldown: Duration) -> Self {
        Self {
            role: AudienceRole::for_device(&profile.device_id),
            profile,
            cooldown,
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn role(&self) -> AudienceRole {
        self.role
    }

    /// Forget per-round memory once the show restarted below it
    pub fn observe_round(&mut self, round_id: RoundId) {
        let latest = self
            .profile
            .last_normal_round
            .max(self.profile.last_ability_round);
        if round_id < latest {
            self.profile.last_normal_round = 0;
            self.profile.last_ability_round = 0;
        }
    }

    pub fn check(
        &self,
        director: &Director,
        session: &Session,
        kind: VoteKind,
        now: Millis,
    ) -> Result<(), VoteRejection> {
        round_accepts_votes(director, session, now)?;

        if self.profile.last_round(kind) == session.round_id {
            return Err(VoteRejection::AlreadyVoted {
                round_id: session.round_id,
                kind,
            });
        }

        if self.cooling_down(now) {
            return Err(VoteRejection::CoolingDown {
                remaining_ms: self.ready_at() - now,
            });
        }
        Ok(())
    }

    fn ready_at(&self) -> Millis {
        self.profile.last_vote_at + self.cooldown.as_millis() as Millis
    }

    /// Whether the last vote is still inside the cooldown window
    pub fn cooling_down(&self, now: Millis) -> bool {
        self.profile.last_vote_at != 0 && now < self.ready_at()
    }

    pub fn record(&mut self, kind: VoteKind, round_id: RoundId, now: Millis) {
        self.profile.last_vote_at = now;
        match kind {
            VoteKind::Normal => self.profile.last_normal_round = round_id,
            VoteKind::Ability => self.profile.last_ability_round = round_id,
        }
    }

    /// Check, write the vote straight into the ledger, and remember it
    pub async fn cast(
        &mut self,
        store: &dyn SharedStore,
        kind: VoteKind,
        choice: Option<VoteType>,
        now: Millis,
    ) -> Result<EntryId, SubmitError> {
        let director: Director = store::read_or_default(store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(store, paths::SESSION).await?;

        self.observe_round(session.round_id);
        self.check(&director, &session, kind, now)?;
        let entry = entry_for(&self.profile.device_id, kind, choice, now)?;

        let entry_id = store
            .push(
                &paths::round_votes(session.round_id),
                serde_json::to_value(&entry).map_err(StoreError::from)?,
            )
            .await?;
        self.record(kind, session.round_id, now);
        Ok(entry_id)
    }
}
