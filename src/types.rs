use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Opaque ID types
pub type RoundId = u64;
pub type InstanceId = String;
pub type DeviceId = String;
pub type EntryId = String;

/// Stability a fresh world starts with
pub const DEFAULT_STABILITY: u8 = 70;
pub const MAX_STABILITY: u8 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectorMode {
    #[default]
    Normal,
    Freeze,
    Blackout,
}

/// Global mode switch written only by stage operators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Director {
    #[serde(default)]
    pub mode: DirectorMode,
    #[serde(default)]
    pub auto_run: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Waiting,
    Active,
    Locked,
    Frozen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartedBy {
    Auto,
    Manual,
}

/// The round state machine's shared record.
///
/// Build it through the per-state constructors so that `ends_at` is only set while
/// `active`/`locked` and `next_starts_at` only while `waiting`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub round_id: RoundId,
    #[serde(default)]
    pub ends_at: Millis,
    #[serde(default)]
    pub next_starts_at: Millis,
    #[serde(default)]
    pub controller_id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<StartedBy>,
    #[serde(default)]
    pub updated_at: Millis,
}

impl Session {
    pub fn waiting(round_id: RoundId, controller_id: InstanceId, now: Millis) -> Self {
        Self {
            state: SessionState::Waiting,
            round_id,
            ends_at: 0,
            next_starts_at: 0,
            controller_id,
            started_by: None,
            updated_at: now,
        }
    }

    pub fn active(
        round_id: RoundId,
        ends_at: Millis,
        started_by: StartedBy,
        controller_id: InstanceId,
        now: Millis,
    ) -> Self {
        Self {
            state: SessionState::Active,
            round_id,
            ends_at,
            next_starts_at: 0,
            controller_id,
            started_by: Some(started_by),
            updated_at: now,
        }
    }

    /// Lock keeps `started_by` so the reveal screen can still show it
    pub fn locked(&self, ends_at: Millis, now: Millis) -> Self {
        Self {
            state: SessionState::Locked,
            ends_at,
            next_starts_at: 0,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn frozen(&self, now: Millis) -> Self {
        Self {
            state: SessionState::Frozen,
            ends_at: 0,
            next_starts_at: 0,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    #[default]
    Stable,
    Glitch,
    Override,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Normal,
    Ability,
}

impl VoteKind {
    pub fn power(self) -> u32 {
        match self {
            VoteKind::Normal => 1,
            VoteKind::Ability => 3,
        }
    }
}

/// Role permanently assigned to an audience device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AudienceRole {
    Observer,
    Glitch,
    Hacker,
}

impl AudienceRole {
    /// The outcome an ability vote from this role always pushes
    pub fn ability_type(self) -> VoteType {
        match self {
            AudienceRole::Observer => VoteType::Stable,
            AudienceRole::Glitch => VoteType::Glitch,
            AudienceRole::Hacker => VoteType::Override,
        }
    }
}

/// One append-only ledger entry under `votes/{roundId}/{entryId}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteEntry {
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    pub power: u32,
    pub kind: VoteKind,
    pub role: AudienceRole,
    pub device_id: DeviceId,
    pub ts: Millis,
}

/// Per-outcome power sums for one round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Scores {
    pub stable: u32,
    pub glitch: u32,
    #[serde(rename = "override")]
    pub override_: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct World {
    pub stability: u8,
    pub dominant: VoteType,
    #[serde(default)]
    pub updated_at: Millis,
    #[serde(default)]
    pub round_id: RoundId,
    #[serde(default)]
    pub last_delta: i64,
    #[serde(default)]
    pub last_scores: Scores,
}

impl World {
    pub fn reset(now: Millis) -> Self {
        Self {
            updated_at: now,
            ..Self::default()
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
            dominant: VoteType::Stable,
            updated_at: 0,
            round_id: 0,
            last_delta: 0,
            last_scores: Scores::default(),
        }
    }
}

/// Who currently holds the right to drive timers, with a fencing token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerLease {
    pub holder: InstanceId,
    pub fence: u64,
    pub expires_at: Millis,
}

impl ControllerLease {
    pub fn is_live(&self, now: Millis) -> bool {
        self.expires_at > now
    }
}

/// Which screen a connection renders
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    Stage,
    Performer,
    Audience,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_wire_format() {
        let session = Session::active(3, 25_000, StartedBy::Auto, "stg-1".to_string(), 5_000);
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["state"], "active");
        assert_eq!(json["roundId"], 3);
        assert_eq!(json["endsAt"], 25_000);
        assert_eq!(json["nextStartsAt"], 0);
        assert_eq!(json["controllerId"], "stg-1");
        assert_eq!(json["startedBy"], "auto");
    }

    #[test]
    fn test_session_defaults_when_fields_missing() {
        let session: Session = serde_json::from_str(r#"{"state":"locked"}"#).unwrap();
        assert_eq!(session.state, SessionState::Locked);
        assert_eq!(session.round_id, 0);
        assert!(session.started_by.is_none());
        assert!(session.controller_id.is_empty());
    }

    #[test]
    fn test_frozen_clears_deadlines() {
        let session = Session::active(2, 9_000, StartedBy::Manual, "a".to_string(), 1_000);
        let frozen = session.frozen(2_000);
        assert_eq!(frozen.state, SessionState::Frozen);
        assert_eq!(frozen.ends_at, 0);
        assert_eq!(frozen.next_starts_at, 0);
        assert_eq!(frozen.round_id, 2);
    }

    #[test]
    fn test_vote_entry_wire_format() {
        let entry = VoteEntry {
            vote_type: VoteType::Override,
            power: 3,
            kind: VoteKind::Ability,
            role: AudienceRole::Hacker,
            device_id: "dev".to_string(),
            ts: 42,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "override");
        assert_eq!(json["kind"], "ability");
        assert_eq!(json["role"], "Hacker");
        assert_eq!(json["deviceId"], "dev");
    }

    #[test]
    fn test_world_defaults() {
        let world = World::default();
        assert_eq!(world.stability, 70);
        assert_eq!(world.dominant, VoteType::Stable);

        let json = serde_json::to_value(World::reset(7)).unwrap();
        assert_eq!(json["lastScores"]["override"], 0);
        assert_eq!(json["updatedAt"], 7);
    }

    #[test]
    fn test_ability_types_follow_role() {
        assert_eq!(AudienceRole::Observer.ability_type(), VoteType::Stable);
        assert_eq!(AudienceRole::Glitch.ability_type(), VoteType::Glitch);
        assert_eq!(AudienceRole::Hacker.ability_type(), VoteType::Override);
    }
}
