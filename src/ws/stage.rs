//! Stage console message handlers

use super::Connection;
use crate::protocol::ServerMessage;
use crate::stage::{ActionOutcome, OperatorAction};

pub async fn handle_operator(conn: &Connection, action: OperatorAction) -> Option<ServerMessage> {
    let Some(link) = &conn.stage else {
        return Some(ServerMessage::Error {
            code: "NO_OPERATOR".to_string(),
            msg: "Connection has no stage operator".to_string(),
        });
    };

    let outcome = link.handle.dispatch(action.clone()).await;
    match &outcome {
        ActionOutcome::Applied => {
            tracing::info!(instance = %link.instance_id, ?action, "Operator action applied")
        }
        ActionOutcome::Rejected { rejection } => {
            tracing::info!(instance = %link.instance_id, ?action, code = rejection.code(), "Operator action rejected")
        }
        ActionOutcome::Failed { message } => {
            tracing::warn!(instance = %link.instance_id, ?action, "Operator action failed: {}", message)
        }
    }
    Some(ServerMessage::OperatorResult { action, outcome })
}
