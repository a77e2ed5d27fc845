//! # Dispatcher
//!
//! Turns a command string into a wire request and waits for (or hands back
//! a handle to) its eventual response. Mock and real agents are
//! indistinguishable here — both are just entries in the
//! [`crate::registry::ConnectionRegistry`] — so there is exactly one code
//! path for "send a command to an agent".

use crate::config::Settings;
use crate::correlator::generate_request_id;
use crate::error::{FleetError, FleetResult};
use crate::models::CommandResponse;
use crate::state::AppState;
use chrono::Utc;
use fleet_protocol::ServerMessage;
use std::time::Duration;
use tracing::warn;

/// Outcome of polling an async-submitted command.
#[derive(Debug, Clone)]
pub enum CommandLookup {
    Pending,
    Resolved(CommandResponse),
    Unknown,
}

fn not_connected_error(state: &AppState, agent_id: &str) -> FleetError {
    FleetError::AgentNotConnected {
        agent_id: agent_id.to_string(),
        connected: state.registry.connected_agents(),
        mock: state.mock.known_ids(),
    }
}

/// Send `command` to `agent_id` and block until it resolves or times out.
/// Used by `POST /agents/{id}/command`.
pub async fn execute(
    state: &AppState,
    agent_id: &str,
    command: &str,
    requested_timeout: Option<Duration>,
) -> FleetResult<CommandResponse> {
    if !state.registry.is_connected(agent_id) {
        return Err(not_connected_error(state, agent_id));
    }

    let timeout = Settings::clamp_timeout(requested_timeout.unwrap_or(state.settings.default_command_timeout));
    let request_id = generate_request_id("ps");
    let rx = state.correlator.begin(&request_id, agent_id, command);

    let message = ServerMessage::PowershellCommand {
        request_id: request_id.clone(),
        command: command.to_string(),
        timeout: timeout.as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    };

    if !state.registry.send(agent_id, message) {
        state.correlator.cancel(&request_id);
        warn!(agent_id, request_id, "send failed, command never left the server");
        return Err(FleetError::SendFailed);
    }

    Ok(state.correlator.await_response(&request_id, rx, timeout).await)
}

/// Send `command` to `agent_id` without blocking for the result. Used by
/// `POST /agents/{id}/command/async`. A background task still drives the
/// timeout so a caller who never polls doesn't leave the entry `Waiting`
/// forever.
pub async fn submit(
    state: &AppState,
    agent_id: &str,
    command: &str,
    requested_timeout: Option<Duration>,
) -> FleetResult<String> {
    if !state.registry.is_connected(agent_id) {
        return Err(not_connected_error(state, agent_id));
    }

    let timeout = Settings::clamp_timeout(requested_timeout.unwrap_or(state.settings.default_command_timeout));
    let request_id = generate_request_id("ps");
    let rx = state.correlator.begin(&request_id, agent_id, command);

    let message = ServerMessage::PowershellCommand {
        request_id: request_id.clone(),
        command: command.to_string(),
        timeout: timeout.as_secs(),
        timestamp: Utc::now().to_rfc3339(),
    };

    if !state.registry.send(agent_id, message) {
        state.correlator.cancel(&request_id);
        return Err(FleetError::SendFailed);
    }

    let correlator = state.correlator.clone();
    let watched_id = request_id.clone();
    tokio::spawn(async move {
        correlator.await_response(&watched_id, rx, timeout).await;
    });

    Ok(request_id)
}

/// Poll a previously-submitted async command. Used by `GET
/// /commands/{request_id}`.
pub fn get_result(state: &AppState, request_id: &str) -> CommandLookup {
    match state.correlator.get(request_id) {
        Some(response) => CommandLookup::Resolved(response),
        None if state.correlator.contains(request_id) => CommandLookup::Pending,
        None => CommandLookup::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::state::AppState;
    use crate::store::InMemoryStore;

    fn test_state() -> AppState {
        AppState::new(Settings::for_tests(), InMemoryStore::new())
    }

    #[tokio::test]
    async fn execute_against_unknown_agent_is_not_connected() {
        let state = test_state();
        let err = execute(&state, "ghost", "Get-Date", None).await.unwrap_err();
        assert!(matches!(err, FleetError::AgentNotConnected { .. }));
    }

    #[tokio::test]
    async fn execute_resolves_once_agent_replies() {
        let state = test_state();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let connection_id = state.registry.attach(tx);
        state.registry.bind(&connection_id, "A1");

        let state_clone = state.clone();
        let responder = tokio::spawn(async move {
            let ServerMessage::PowershellCommand { request_id, .. } = rx.recv().await.unwrap() else {
                panic!("expected powershell_command");
            };
            crate::messages::record_command_result(
                &state_clone,
                &connection_id,
                &request_id,
                true,
                serde_json::Value::String("done".into()),
                None,
                Some(0),
                0.01,
                &Utc::now().to_rfc3339(),
                None,
            )
            .await;
        });

        let response = execute(&state, "A1", "Get-Date", Some(Duration::from_secs(5))).await.unwrap();
        assert!(response.success);
        assert_eq!(response.output, "done");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn submit_then_poll_observes_pending_then_resolved() {
        let state = test_state();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let connection_id = state.registry.attach(tx);
        state.registry.bind(&connection_id, "A1");

        let request_id = submit(&state, "A1", "Get-Date", Some(Duration::from_secs(5))).await.unwrap();
        assert!(matches!(get_result(&state, &request_id), CommandLookup::Pending));

        let ServerMessage::PowershellCommand { request_id: rid, .. } = rx.recv().await.unwrap() else {
            panic!("expected powershell_command");
        };
        assert_eq!(rid, request_id);

        crate::messages::record_command_result(
            &state,
            &connection_id,
            &request_id,
            true,
            serde_json::Value::String("ok".into()),
            None,
            Some(0),
            0.01,
            &Utc::now().to_rfc3339(),
            None,
        )
        .await;

        match get_result(&state, &request_id) {
            CommandLookup::Resolved(response) => assert!(response.success),
            other => panic!("expected resolved, got {other:?}"),
        }
    }
}
