//! # WebSocket Handlers
//!
//! Two independent WebSocket surfaces share this module's shape (upgrade ->
//! spawn outbound task -> drain inbound loop -> cleanup on disconnect) but
//! carry unrelated wire protocols:
//!
//! - [`agent_ws`] — the transport real (and mock) agents speak, carrying
//!   [`AgentMessage`]/[`ServerMessage`] frames, registered in the
//!   [`crate::registry::ConnectionRegistry`].
//! - [`terminal_ws`] — the transport a UI client speaks while attached to
//!   one interactive terminal session, carrying [`TerminalMessage`] frames,
//!   tracked by the [`crate::terminal::TerminalManager`].

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use fleet_protocol::{AgentMessage, ServerMessage, TerminalMessage};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// `GET /ws` — upgrade point for agents.
pub async fn agent_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_connection(socket, state))
}

async fn handle_agent_connection(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = state.registry.attach(tx);
    info!(connection_id, "agent connection opened");

    let ws_sink = Arc::new(tokio::sync::Mutex::new(ws_sink));
    let outbound_sink = ws_sink.clone();
    let outbound_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound server message");
                    continue;
                }
            };
            let mut sink = outbound_sink.lock().await;
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut registered = false;
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<AgentMessage>(&text) {
                Ok(decoded) => {
                    if !registered {
                        if !matches!(decoded, AgentMessage::Register { .. }) {
                            warn!(
                                connection_id,
                                "closing the connection for a registration-protocol violation: first frame was not register"
                            );
                            break;
                        }
                        registered = true;
                    }
                    crate::messages::handle_inbound(&state, &connection_id, decoded).await
                }
                Err(err) => debug!(%err, "dropping malformed agent frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(connection_id, "agent connection closed");
    outbound_task.abort();
    state.registry.detach(&connection_id);
}

#[derive(Debug, Deserialize)]
pub struct TerminalOpenParams {
    pub user_id: Option<String>,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    pub working_directory: Option<String>,
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

/// `GET /agents/{id}/terminal` — upgrade point for a UI client opening one
/// interactive terminal session against agent `id`.
pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(params): Query<TerminalOpenParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal_connection(socket, state, agent_id, params))
}

async fn handle_terminal_connection(socket: WebSocket, state: AppState, agent_id: String, params: TerminalOpenParams) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<TerminalMessage>();

    let user_id = params.user_id.unwrap_or_else(|| "anonymous".to_string());
    let session_id = state.terminal.create_session(
        &state.registry,
        &agent_id,
        &user_id,
        params.rows,
        params.cols,
        params.working_directory,
        tx.clone(),
    );

    let Some(session_id) = session_id else {
        let ws_sink = Arc::new(tokio::sync::Mutex::new(ws_sink));
        let mut sink = ws_sink.lock().await;
        let _ = sink
            .send(Message::Text(
                serde_json::to_string(&TerminalMessage::Error {
                    session_id: String::new(),
                    data: format!("agent '{agent_id}' is not connected"),
                })
                .unwrap_or_default()
                .into(),
            ))
            .await;
        let _ = sink.close().await;
        return;
    };

    info!(session_id, agent_id, "terminal session opened");
    let _ = tx.send(TerminalMessage::SessionCreated {
        session_id: session_id.clone(),
    });

    let ws_sink = Arc::new(tokio::sync::Mutex::new(ws_sink));
    let outbound_sink = ws_sink.clone();
    let outbound_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound terminal message");
                    continue;
                }
            };
            let mut sink = outbound_sink.lock().await;
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<TerminalMessage>(&text) {
                Ok(TerminalMessage::Input { data, .. }) => {
                    state
                        .terminal
                        .handle_ui_input(&state.registry, &state.store, &session_id, data)
                        .await;
                }
                Ok(TerminalMessage::Resize { rows, cols, .. }) => {
                    state.terminal.resize(&state.registry, &session_id, rows, cols);
                }
                Ok(TerminalMessage::Ping { .. }) => state.terminal.ping(&session_id),
                Ok(TerminalMessage::Close { .. }) => break,
                Ok(_) => {}
                Err(err) => debug!(%err, "dropping malformed terminal frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(session_id, "terminal session closed");
    outbound_task.abort();
    state.terminal.close(&state.registry, &session_id);
}
