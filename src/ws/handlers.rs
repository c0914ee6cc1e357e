//! WebSocket message dispatch
//!
//! Authorization is checked here, then dispatched to screen-specific handler modules.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::stage::OperatorAction;
use crate::state::AppState;
use crate::store::SharedStore;
use crate::types::Screen;
use std::sync::Arc;

use super::{audience, stage, Connection};

/// Macro to check stage authorization and return early if unauthorized
macro_rules! check_stage {
    ($conn:expr, $action:expr) => {
        if $conn.screen != Screen::Stage {
            return Some(ServerMessage::Error {
                code: "UNAUTHORIZED".to_string(),
                msg: format!("Only the stage can {}", $action),
            });
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Sync => Some(super::full_state(state).await),

        ClientMessage::Get { path } => {
            check_stage!(conn, "read store paths");
            match state.store.get(&path).await {
                Ok(value) => Some(ServerMessage::PathValue { path, value }),
                Err(e) => Some(ServerMessage::Error {
                    code: "STORE_ERROR".to_string(),
                    msg: e.to_string(),
                }),
            }
        }

        // Audience messages
        ClientMessage::CastVote {
            kind,
            choice,
            msg_id,
        } => audience::handle_cast_vote(state, conn, kind, choice, msg_id).await,

        // Stage-only commands (authorization checked before dispatch)
        ClientMessage::StageStartRound => {
            check_stage!(conn, "start rounds");
            stage::handle_operator(conn, OperatorAction::StartRound).await
        }

        ClientMessage::StageSetAutoRun { enabled } => {
            check_stage!(conn, "toggle auto-run");
            stage::handle_operator(conn, OperatorAction::SetAutoRun { enabled }).await
        }

        ClientMessage::StageFreeze => {
            check_stage!(conn, "freeze the show");
            stage::handle_operator(conn, OperatorAction::Freeze).await
        }

        ClientMessage::StageBlackout => {
            check_stage!(conn, "black out the show");
            stage::handle_operator(conn, OperatorAction::Blackout).await
        }

        ClientMessage::StageResume => {
            check_stage!(conn, "resume the show");
            stage::handle_operator(conn, OperatorAction::Resume).await
        }

        ClientMessage::StageResetVotes => {
            check_stage!(conn, "reset votes");
            stage::handle_operator(conn, OperatorAction::ResetVotes).await
        }

        ClientMessage::StageRestart => {
            check_stage!(conn, "restart the show");
            stage::handle_operator(conn, OperatorAction::Restart).await
        }
    }
}
