//! When a vote may be written to the ledger, and the relay-side enforcement of it.

use super::device::{DeviceProfile, VoterDevice};
use crate::clock::{Clock, Millis};
use crate::store::{self, paths, SharedStore, StoreError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VoteRejection {
    #[error("Voting is paused ({mode:?})")]
    ModeNotNormal { mode: DirectorMode },

    #[error("Voting is closed while the session is {state:?}")]
    NotActive { state: SessionState },

    #[error("No round has started yet")]
    NoRound,

    #[error("Round {round_id} has ended")]
    Expired { round_id: RoundId },

    #[error("Already cast a {kind:?} vote in round {round_id}")]
    AlreadyVoted { round_id: RoundId, kind: VoteKind },

    #[error("Wait {remaining_ms}ms before voting again")]
    CoolingDown { remaining_ms: Millis },

    #[error("{role:?} ability votes are always {expected:?}")]
    AbilityTypeMismatch {
        role: AudienceRole,
        expected: VoteType,
    },

    #[error("A normal vote needs a choice")]
    MissingChoice,
}

impl VoteRejection {
    pub fn code(&self) -> &'static str {
        match self {
            VoteRejection::ModeNotNormal { .. } => "MODE_NOT_NORMAL",
            VoteRejection::NotActive { .. } => "NOT_ACTIVE",
            VoteRejection::NoRound => "NO_ROUND",
            VoteRejection::Expired { .. } => "EXPIRED",
            VoteRejection::AlreadyVoted { .. } => "ALREADY_VOTED",
            VoteRejection::CoolingDown { .. } => "COOLING_DOWN",
            VoteRejection::AbilityTypeMismatch { .. } => "ABILITY_TYPE_MISMATCH",
            VoteRejection::MissingChoice => "MISSING_CHOICE",
        }
    }
}

/// The round-level part of the voting contract, shared by every screen
pub fn round_accepts_votes(
    director: &Director,
    session: &Session,
    now: Millis,
) -> Result<(), VoteRejection> {
    if director.mode != DirectorMode::Normal {
        return Err(VoteRejection::ModeNotNormal {
            mode: director.mode,
        });
    }
    if session.state != SessionState::Active {
        return Err(VoteRejection::NotActive {
            state: session.state,
        });
    }
    if session.round_id == 0 {
        return Err(VoteRejection::NoRound);
    }
    if session.ends_at <= now {
        return Err(VoteRejection::Expired {
            round_id: session.round_id,
        });
    }
    Ok(())
}

/// Build the ledger entry for a vote; power and role are never taken from the voter
pub fn entry_for(
    device_id: &str,
    kind: VoteKind,
    choice: Option<VoteType>,
    now: Millis,
) -> Result<VoteEntry, VoteRejection> {
    let role = AudienceRole::for_device(device_id);
    let vote_type = match kind {
        VoteKind::Normal => choice.ok_or(VoteRejection::MissingChoice)?,
        VoteKind::Ability => {
            let expected = role.ability_type();
            if choice.is_some_and(|c| c != expected) {
                return Err(VoteRejection::AbilityTypeMismatch { role, expected });
            }
            expected
        }
    };

    Ok(VoteEntry {
        vote_type,
        power: kind.power(),
        kind,
        role,
        device_id: device_id.to_string(),
        ts: now,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] VoteRejection),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub round_id: RoundId,
    pub entry_id: EntryId,
    pub entry: VoteEntry,
}

/// Relay-side enforcement of the voting contract for votes arriving over WebSocket.
///
/// Submissions are serialised through one lock so a device cannot slip two votes of
/// the same kind past the ledger check.
pub struct VoteGate {
    store: Arc<dyn SharedStore>,
    clock: Clock,
    cooldown: Duration,
    devices: Mutex<DeviceBook>,
}

/// Devices that voted recently, keyed by the round they were last pruned for
#[derive(Default)]
struct DeviceBook {
    round_id: RoundId,
    devices: HashMap<DeviceId, VoterDevice>,
}

impl DeviceBook {
    /// On a new round keep only devices still cooling down; the ledger check
    /// covers everything else
    fn observe_round(&mut self, round_id: RoundId, now: Millis) {
        if round_id == self.round_id {
            return;
        }
        let before = self.devices.len();
        self.devices.retain(|_, device| device.cooling_down(now));
        tracing::debug!(
            round_id,
            pruned = before - self.devices.len(),
            "Pruned voter devices"
        );
        self.round_id = round_id;
    }
}

impl VoteGate {
    pub fn new(store: Arc<dyn SharedStore>, clock: Clock, cooldown: Duration) -> Self {
        Self {
            store,
            clock,
            cooldown,
            devices: Mutex::new(DeviceBook::default()),
        }
    }

    pub async fn submit(
        &self,
        device_id: &str,
        kind: VoteKind,
        choice: Option<VoteType>,
    ) -> Result<VoteReceipt, SubmitError> {
        let mut book = self.devices.lock().await;

        let director: Director = store::read_or_default(&*self.store, paths::DIRECTOR).await?;
        let session: Session = store::read_or_default(&*self.store, paths::SESSION).await?;
        let now = self.clock.now_ms();

        // Closed rounds are rejected before any per-device memory is allocated
        round_accepts_votes(&director, &session, now)?;
        book.observe_round(session.round_id, now);

        let mut device = book
            .devices
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| VoterDevice::new(DeviceProfile::new(device_id), self.cooldown));
        device.observe_round(session.round_id);
        device.check(&director, &session, kind, now)?;

        // The ledger outlives this process' memory of devices
        let ledger = store::read_round_votes(&*self.store, session.round_id).await?;
        if ledger
            .iter()
            .any(|(_, entry)| entry.device_id == device_id && entry.kind == kind)
        {
            return Err(VoteRejection::AlreadyVoted {
                round_id: session.round_id,
                kind,
            }
            .into());
        }

        let entry = entry_for(device_id, kind, choice, now)?;
        let entry_id = self
            .store
            .push(
                &paths::round_votes(session.round_id),
                serde_json::to_value(&entry).map_err(StoreError::from)?,
            )
            .await?;
        device.record(kind, session.round_id, now);
        book.devices.insert(device_id.to_string(), device);

        tracing::debug!(
            round_id = session.round_id,
            device_id,
            ?kind,
            vote_type = ?entry.vote_type,
            "Vote recorded"
        );
        Ok(VoteReceipt {
            round_id: session.round_id,
            entry_id,
            entry,
        })
    }
}
