//! What the three screens render, derived from the shared records.

use crate::clock::Millis;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Screen-level phase, folding director mode into session state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Between rounds with no countdown running
    Idle,
    /// Between rounds, auto-run counting down
    Countdown,
    Voting,
    Reveal,
    Frozen,
    Blackout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShowView {
    pub phase: Phase,
    pub round_id: RoundId,
    /// Whole seconds until the current deadline, rounded up
    pub seconds_left: u64,
    pub stability: u8,
    pub dominant: VoteType,
    /// Stability is under the glitch threshold
    pub glitch_mode: bool,
    pub auto_run: bool,
}

impl ShowView {
    pub fn derive(
        director: &Director,
        session: &Session,
        world: &World,
        glitch_threshold: u8,
        now: Millis,
    ) -> Self {
        let phase = match (director.mode, session.state) {
            (DirectorMode::Blackout, _) => Phase::Blackout,
            (DirectorMode::Freeze, _) | (_, SessionState::Frozen) => Phase::Frozen,
            (_, SessionState::Active) => Phase::Voting,
            (_, SessionState::Locked) => Phase::Reveal,
            (_, SessionState::Waiting) if session.next_starts_at > now => Phase::Countdown,
            (_, SessionState::Waiting) => Phase::Idle,
        };

        let deadline = match phase {
            Phase::Voting | Phase::Reveal => session.ends_at,
            Phase::Countdown => session.next_starts_at,
            _ => 0,
        };

        Self {
            phase,
            round_id: session.round_id,
            seconds_left: seconds_until(deadline, now),
            stability: world.stability,
            dominant: world.dominant,
            glitch_mode: world.stability < glitch_threshold,
            auto_run: director.auto_run,
        }
    }
}

fn seconds_until(deadline: Millis, now: Millis) -> u64 {
    if deadline <= now {
        return 0;
    }
    ((deadline - now) as u64).div_ceil(1000)
}
