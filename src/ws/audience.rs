//! Audience message handlers

use super::Connection;
use crate::audience::SubmitError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{Screen, VoteKind, VoteType};
use std::sync::Arc;

pub async fn handle_cast_vote(
    state: &Arc<AppState>,
    conn: &Connection,
    kind: VoteKind,
    choice: Option<VoteType>,
    msg_id: Option<String>,
) -> Option<ServerMessage> {
    let device_id = match (&conn.screen, &conn.device_id) {
        (Screen::Audience, Some(device_id)) => device_id,
        _ => {
            return Some(ServerMessage::Error {
                code: "UNAUTHORIZED".to_string(),
                msg: "Only audience devices can vote".to_string(),
            })
        }
    };

    match state.votes.submit(device_id, kind, choice).await {
        Ok(receipt) => Some(ServerMessage::VoteAck {
            round_id: receipt.round_id,
            entry_id: receipt.entry_id,
            msg_id,
        }),
        Err(SubmitError::Rejected(rejection)) => {
            tracing::debug!(device_id = %device_id, code = rejection.code(), "Vote rejected");
            Some(ServerMessage::VoteRejected {
                code: rejection.code().to_string(),
                rejection,
                msg_id,
            })
        }
        Err(SubmitError::Store(e)) => {
            tracing::warn!("Vote write failed: {}", e);
            Some(ServerMessage::Error {
                code: "STORE_ERROR".to_string(),
                msg: e.to_string(),
            })
        }
    }
}
