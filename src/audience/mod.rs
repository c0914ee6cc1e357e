//! Audience voting: role assignment, the round gate, and per-device rules.

pub mod device;
pub mod gate;

pub use device::{new_device_id, DeviceProfile, VoterDevice};
pub use gate::{entry_for, round_accepts_votes, SubmitError, VoteGate, VoteReceipt, VoteRejection};

use crate::types::AudienceRole;
use sha2::{Digest, Sha256};

impl AudienceRole {
    /// Deterministic role for a device id, stable for the device's lifetime
    pub fn for_device(device_id: &str) -> Self {
        let digest = Sha256::digest(device_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        match u64::from_be_bytes(prefix) % 3 {
            0 => AudienceRole::Observer,
            1 => AudienceRole::Glitch,
            _ => AudienceRole::Hacker,
        }
    }
}
