mod audience;
pub mod handlers;
mod stage;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::audience::new_device_id;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::{AppState, StageLink};
use crate::store::{paths, paths_overlap, Notification, SharedStore};
use crate::types::{AudienceRole, DeviceId, Screen};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
    /// Persisted audience device id
    pub device: Option<String>,
    /// Persisted stage instance id
    pub instance: Option<String>,
}

/// Who is on the other end of a socket
pub struct Connection {
    pub screen: Screen,
    pub device_id: Option<DeviceId>,
    pub stage: Option<StageLink>,
}

impl Connection {
    pub fn audience(device_id: impl Into<DeviceId>) -> Self {
        Self {
            screen: Screen::Audience,
            device_id: Some(device_id.into()),
            stage: None,
        }
    }

    pub fn performer() -> Self {
        Self {
            screen: Screen::Performer,
            device_id: None,
            stage: None,
        }
    }

    pub fn stage(link: StageLink) -> Self {
        Self {
            screen: Screen::Stage,
            device_id: None,
            stage: Some(link),
        }
    }

    /// Store paths relayed to this screen
    fn watched_paths(&self) -> &'static [&'static str] {
        match self.screen {
            Screen::Stage => &[
                paths::DIRECTOR,
                paths::SESSION,
                paths::WORLD,
                paths::VOTES,
                paths::CONTROLLER,
            ],
            Screen::Performer | Screen::Audience => {
                &[paths::DIRECTOR, paths::SESSION, paths::WORLD]
            }
        }
    }

    fn watches(&self, path: &str) -> bool {
        self.watched_paths()
            .iter()
            .any(|watched| paths_overlap(watched, path))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// WebSocket upgrade for audience and performer screens
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request: role={:?}, device={:?}",
        params.role,
        params.device
    );

    let connection = match params.role.as_deref() {
        Some("performer") => Connection::performer(),
        _ => Connection::audience(non_empty(params.device).unwrap_or_else(new_device_id)),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, connection, state))
}

/// WebSocket upgrade for stage consoles (mounted behind stage auth)
pub async fn stage_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("Stage connection request: instance={:?}", params.instance);

    let instance_id = non_empty(params.instance);
    ws.on_upgrade(move |socket| async move {
        let link = state.attach_stage(instance_id).await;
        handle_socket(socket, Connection::stage(link), state).await
    })
}

async fn send(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

async fn full_state(state: &AppState) -> ServerMessage {
    match state.show_state().await {
        Ok(show) => ServerMessage::State { state: show },
        Err(e) => ServerMessage::Error {
            code: "STORE_ERROR".to_string(),
            msg: e.to_string(),
        },
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, connection: Connection, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let screen = connection.screen;

    // Subscribe before reading the welcome state so no write falls in between
    let mut changes = state.store.subscribe("");

    let welcome = match state.show_state().await {
        Ok(show) => ServerMessage::Welcome {
            protocol: PROTOCOL_VERSION.to_string(),
            screen,
            instance_id: connection.stage.as_ref().map(|l| l.instance_id.clone()),
            device_id: connection.device_id.clone(),
            role: connection.device_id.as_deref().map(AudienceRole::for_device),
            server_now: state.clock.now_rfc3339(),
            server_ms: state.clock.now_ms(),
            state: show,
        },
        Err(e) => {
            tracing::error!("Failed to read show state for welcome: {}", e);
            ServerMessage::Error {
                code: "STORE_ERROR".to_string(),
                msg: e.to_string(),
            }
        }
    };

    if send(&mut sender, &welcome).await {
        tracing::info!("WebSocket connected with screen: {:?}", screen);

        loop {
            tokio::select! {
                notification = changes.recv() => {
                    let msg = match notification {
                        Some(Notification::Changed(change)) => {
                            if !connection.watches(&change.path) {
                                continue;
                            }
                            if change.path.is_empty() {
                                full_state(&state).await
                            } else {
                                ServerMessage::Changed {
                                    path: change.path,
                                    value: change.value,
                                    revision: change.revision,
                                }
                            }
                        }
                        Some(Notification::Lagged(_)) => full_state(&state).await,
                        None => break,
                    };
                    if !send(&mut sender, &msg).await {
                        break;
                    }
                }

                // Handle client messages
                ws_msg = receiver.next() => {
                    match ws_msg {
                        Some(Ok(Message::Text(text))) => {
                            tracing::debug!("Received message: {}", text);

                            let response = match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(client_msg) => {
                                    handlers::handle_message(client_msg, &connection, &state).await
                                }
                                Err(e) => {
                                    tracing::warn!("Failed to parse client message: {}", e);
                                    Some(ServerMessage::Error {
                                        code: "PARSE_ERROR".to_string(),
                                        msg: format!("Invalid message format: {}", e),
                                    })
                                }
                            };
                            if let Some(response) = response {
                                if !send(&mut sender, &response).await {
                                    tracing::error!("Failed to send response");
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("WebSocket closed");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    } else {
        tracing::error!("Failed to send welcome message");
    }

    if let Some(link) = &connection.stage {
        state.detach_stage(link).await;
    }
    tracing::info!("WebSocket connection closed for screen: {:?}", screen);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_does_not_see_ledger() {
        let audience = Connection::audience("dev");
        assert!(audience.watches("session"));
        assert!(audience.watches(""));
        assert!(!audience.watches("votes/2/abc"));
        assert!(!audience.watches("controller"));
    }

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" stg-1 ".to_string())), Some("stg-1".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
