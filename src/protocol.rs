use crate::audience::VoteRejection;
use crate::clock::Millis;
use crate::stage::{ActionOutcome, OperatorAction};
use crate::types::*;
use crate::view::ShowView;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a full resend of the shared records
    Sync,
    /// Read one store path (stage only)
    Get {
        path: String,
    },
    CastVote {
        kind: VoteKind,
        /// Voter-chosen outcome; ignored for ability votes except as a consistency check
        #[serde(default)]
        choice: Option<VoteType>,
        /// Client correlation id echoed back in the ack
        #[serde(default)]
        msg_id: Option<String>,
    },
    // Stage-only messages
    StageStartRound,
    StageSetAutoRun {
        enabled: bool,
    },
    StageFreeze,
    StageBlackout,
    StageResume,
    StageResetVotes,
    StageRestart,
}

/// The shared records plus the derived view, as sent on connect and resync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowState {
    pub director: Director,
    pub session: Session,
    pub world: World,
    pub view: ShowView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        screen: Screen,
        /// Stage instance id; a console without one should persist this
        #[serde(skip_serializing_if = "Option::is_none")]
        instance_id: Option<InstanceId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<DeviceId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<AudienceRole>,
        server_now: String,
        server_ms: Millis,
        state: ShowState,
    },
    /// Full state after a resync request or a lagged subscription
    State {
        state: ShowState,
    },
    /// One store write relayed from a subscription
    Changed {
        path: String,
        value: Option<Value>,
        revision: u64,
    },
    /// Reply to `get`
    PathValue {
        path: String,
        value: Option<Value>,
    },
    VoteAck {
        round_id: RoundId,
        entry_id: EntryId,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg_id: Option<String>,
    },
    VoteRejected {
        code: String,
        rejection: VoteRejection,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg_id: Option<String>,
    },
    OperatorResult {
        action: OperatorAction,
        outcome: ActionOutcome,
    },
    Error {
        code: String,
        msg: String,
    },
}
