//! # Message Handler
//!
//! One inbound decode-and-route function shared by the real agent
//! WebSocket loop ([`crate::handlers::agent_ws`]) and every mock agent's
//! background task ([`crate::mock`]) — mock agents flow through the same
//! code path as real ones, with no separate short-circuit. Both callers
//! own a `connection_id` already bound in the
//! [`crate::registry::ConnectionRegistry`]; this module never touches the
//! transport directly.

use crate::models::{Agent, AgentStatus, CommandHistoryEntry, CommandResponse};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use fleet_protocol::{AgentMessage, ServerMessage};
use tracing::{debug, warn};

/// Route one decoded [`AgentMessage`] for the agent attached at
/// `connection_id`.
pub async fn handle_inbound(state: &AppState, connection_id: &str, msg: AgentMessage) {
    match msg {
        AgentMessage::Register {
            id,
            hostname,
            ip,
            os,
            os_version,
            tags,
            system_info,
        } => handle_register(state, connection_id, id, hostname, ip, os, os_version, tags, system_info).await,

        AgentMessage::Heartbeat { timestamp, system_info } => {
            handle_heartbeat(state, connection_id, timestamp, system_info).await
        }

        AgentMessage::CommandResult {
            request_id,
            success,
            output,
            error,
            exit_code,
            execution_time,
            timestamp,
            data,
        }
        | AgentMessage::PowershellResult {
            request_id,
            success,
            output,
            error,
            exit_code,
            execution_time,
            timestamp,
            data,
        } => {
            record_command_result(
                state,
                connection_id,
                &request_id,
                success,
                output,
                error,
                exit_code,
                execution_time,
                &timestamp,
                data,
            )
            .await
        }

        AgentMessage::SystemInfoUpdate { system_info } => {
            update_system_info(state, connection_id, system_info).await
        }

        AgentMessage::Pong => debug!(connection_id, "pong received"),

        AgentMessage::TerminalOutput { session_id, data } => {
            state.terminal.handle_agent_output(&session_id, data).await
        }
        AgentMessage::TerminalError { session_id, data } => {
            state.terminal.handle_agent_error(&session_id, data).await
        }
        AgentMessage::TerminalClosed { session_id } => {
            state.terminal.handle_agent_closed(&session_id).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_register(
    state: &AppState,
    connection_id: &str,
    id: String,
    hostname: String,
    ip: Option<String>,
    os: String,
    os_version: Option<String>,
    tags: Vec<String>,
    system_info: Option<serde_json::Value>,
) {
    if let Some(evicted) = state.registry.bind(connection_id, &id) {
        debug!(agent_id = %id, evicted, "prior connection superseded on re-register");
    }

    let mut agent = state.store.get_agent(&id).await.unwrap_or_else(|| Agent::new(&id, &hostname, &os));
    agent.hostname = hostname;
    agent.ip = ip;
    agent.os = os;
    agent.version = os_version;
    agent.tags = tags.into_iter().collect();
    if system_info.is_some() {
        agent.system_info = system_info;
    }
    agent.status = AgentStatus::Online;
    agent.last_seen = Utc::now();
    state.store.upsert_agent(agent).await;

    state.registry.send(
        &id,
        ServerMessage::Welcome {
            agent_id: id.clone(),
            connection_id: connection_id.to_string(),
            message: "registered".into(),
        },
    );
}

async fn handle_heartbeat(
    state: &AppState,
    connection_id: &str,
    timestamp: String,
    system_info: Option<serde_json::Value>,
) {
    let now = Utc::now();
    state.registry.heartbeat(connection_id, now);

    let Some(session) = state.registry.connection(connection_id) else {
        return;
    };
    let Some(agent_id) = session.agent_id else {
        return;
    };
    let Some(mut agent) = state.store.get_agent(&agent_id).await else {
        warn!(agent_id, "heartbeat for agent with no stored record");
        return;
    };
    agent.last_seen = parse_timestamp(&timestamp).unwrap_or(now);
    agent.status = AgentStatus::Online;
    if let Some(info) = system_info {
        agent.system_info = Some(info);
    }
    state.store.upsert_agent(agent).await;
}

async fn update_system_info(state: &AppState, connection_id: &str, system_info: serde_json::Value) {
    let Some(session) = state.registry.connection(connection_id) else {
        return;
    };
    let Some(agent_id) = session.agent_id else {
        return;
    };
    let Some(mut agent) = state.store.get_agent(&agent_id).await else {
        return;
    };
    agent.system_info = Some(system_info);
    agent.last_seen = Utc::now();
    state.store.upsert_agent(agent).await;
}

/// Shared by the real and mock agent paths: deliver a result to whoever is
/// waiting on `request_id` and append it to the agent's command history.
#[allow(clippy::too_many_arguments)]
pub async fn record_command_result(
    state: &AppState,
    connection_id: &str,
    request_id: &str,
    success: bool,
    output_raw: serde_json::Value,
    error: Option<String>,
    exit_code: Option<i32>,
    execution_time: f64,
    timestamp: &str,
    data: Option<serde_json::Value>,
) {
    let (output, preserved) = normalize_output(output_raw);
    let response = CommandResponse {
        success,
        output,
        data: data.or(preserved),
        error: error.unwrap_or_default(),
        exit_code: exit_code.unwrap_or(0),
        execution_time,
        timestamp: parse_timestamp(timestamp).unwrap_or_else(Utc::now),
    };

    state.correlator.deliver(request_id, response.clone());

    let agent_id = state
        .registry
        .connection(connection_id)
        .and_then(|s| s.agent_id)
        .or_else(|| state.correlator.pending_info(request_id).map(|(id, _)| id));

    if let Some(agent_id) = agent_id {
        let command = state
            .correlator
            .pending_info(request_id)
            .map(|(_, command)| command)
            .unwrap_or_default();
        state
            .store
            .append_command_history(CommandHistoryEntry {
                agent_id,
                command,
                success: response.success,
                output: response.output,
                error: response.error,
                execution_time: response.execution_time,
                timestamp: response.timestamp,
            })
            .await;
    }
}

/// Normalizes a command's `output` field, which agents are free to send as
/// a string, a nested object, or an array. Non-string payloads are
/// stringified for display and preserved verbatim in the returned `data`
/// slot.
pub fn normalize_output(value: serde_json::Value) -> (String, Option<serde_json::Value>) {
    match value {
        serde_json::Value::String(s) => (s, None),
        serde_json::Value::Null => (String::new(), None),
        other => {
            let rendered = other.to_string();
            (rendered, Some(other))
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_output_passes_strings_through() {
        let (text, data) = normalize_output(serde_json::Value::String("ok".into()));
        assert_eq!(text, "ok");
        assert!(data.is_none());
    }

    #[test]
    fn normalize_output_stringifies_and_preserves_objects() {
        let payload = serde_json::json!({"pid": 42, "name": "svchost"});
        let (text, data) = normalize_output(payload.clone());
        assert!(text.contains("svchost"));
        assert_eq!(data, Some(payload));
    }

    #[test]
    fn normalize_output_stringifies_and_preserves_arrays() {
        let payload = serde_json::json!([1, 2, 3]);
        let (text, data) = normalize_output(payload.clone());
        assert_eq!(text, "[1,2,3]");
        assert_eq!(data, Some(payload));
    }
}
