//! Vote aggregation and the world update applied once per round.

use crate::clock::Millis;
use crate::types::*;

impl Scores {
    pub fn total(&self) -> u32 {
        self.stable + self.glitch + self.override_
    }

    /// Highest-scoring outcome; ties resolve glitch, then override, then stable
    pub fn dominant(&self) -> VoteType {
        let max = self.stable.max(self.glitch).max(self.override_);
        if self.glitch == max {
            VoteType::Glitch
        } else if self.override_ == max {
            VoteType::Override
        } else {
            VoteType::Stable
        }
    }

    /// Stability change for this round: stable +1, glitch -2, override -3 per point
    pub fn delta(&self) -> i64 {
        i64::from(self.stable) - 2 * i64::from(self.glitch) - 3 * i64::from(self.override_)
    }

    fn add(&mut self, vote_type: VoteType, power: u32) {
        match vote_type {
            VoteType::Stable => self.stable += power,
            VoteType::Glitch => self.glitch += power,
            VoteType::Override => self.override_ += power,
        }
    }
}

/// Sum `power` per outcome over an unordered set of ledger entries
pub fn tally<'a>(entries: impl IntoIterator<Item = &'a VoteEntry>) -> Scores {
    let mut scores = Scores::default();
    for entry in entries {
        scores.add(entry.vote_type, entry.power);
    }
    scores
}

/// The World record that results from closing `round_id` with `scores`.
///
/// A round without votes still produces a write: delta 0 and a stable dominant.
pub fn apply_round(current: &World, scores: Scores, round_id: RoundId, now: Millis) -> World {
    let delta = scores.delta();
    let stability = (i64::from(current.stability) + delta).clamp(0, i64::from(MAX_STABILITY));
    let dominant = if scores.total() == 0 {
        VoteType::Stable
    } else {
        scores.dominant()
    };

    World {
        stability: stability as u8,
        dominant,
        updated_at: now,
        round_id,
        last_delta: delta,
        last_scores: scores,
    }
}
