//! # Wire protocol
//!
//! Message types exchanged between the fleet server and the agents/UI
//! clients attached to it. Messages are serialized as JSON text frames, one
//! object per frame, using serde's internally-tagged representation
//! (`"type": "..."` field) — the same convention the relay server this crate
//! was generalized from already used.
//!
//! Two enums cover the two directions of the agent transport
//! ([`AgentMessage`] and [`ServerMessage`]); a third ([`TerminalMessage`])
//! covers the UI-facing terminal transport, which is logically independent
//! of the agent transport even though both ultimately reach the same agent.

use serde::{Deserialize, Serialize};

/// Messages sent by an agent to the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First message on any new connection. Binds the connection to an
    /// agent id in the server's connection registry.
    Register {
        id: String,
        hostname: String,
        #[serde(default)]
        ip: Option<String>,
        os: String,
        #[serde(alias = "version", default)]
        os_version: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        system_info: Option<serde_json::Value>,
    },

    /// Periodic liveness signal.
    Heartbeat {
        timestamp: String,
        #[serde(default)]
        system_info: Option<serde_json::Value>,
    },

    /// Result of a `powershell_command`/`command` previously sent to this
    /// agent. Accepts both current and legacy field names.
    CommandResult {
        #[serde(alias = "command_id")]
        request_id: String,
        success: bool,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exit_code: Option<i32>,
        execution_time: f64,
        timestamp: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },

    /// Legacy synonym for `CommandResult`, emitted by older PowerShell
    /// executors. Same shape.
    #[serde(rename = "powershell_result")]
    PowershellResult {
        #[serde(alias = "command_id")]
        request_id: String,
        success: bool,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exit_code: Option<i32>,
        execution_time: f64,
        timestamp: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },

    /// Unsolicited or requested system information snapshot.
    SystemInfoUpdate { system_info: serde_json::Value },

    /// Reply to a `Ping` (server-initiated heartbeat probe). No state
    /// change beyond the heartbeat already recorded by the transport layer.
    Pong,

    /// Agent-side terminal output for a session.
    TerminalOutput {
        session_id: String,
        #[serde(default)]
        data: String,
    },

    /// Agent-side terminal error output for a session.
    TerminalError {
        session_id: String,
        #[serde(default)]
        data: String,
    },

    /// Agent reports the PTY-equivalent process for a session has exited.
    TerminalClosed { session_id: String },
}

/// Messages sent by the server to an agent.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One-shot welcome sent immediately after a successful `register`.
    Welcome {
        agent_id: String,
        connection_id: String,
        message: String,
    },

    /// Canonical command-execution request. Always emitted under this name
    /// even though `Command` is accepted on input as a synonym.
    PowershellCommand {
        request_id: String,
        command: String,
        timeout: u64,
        timestamp: String,
    },

    /// Legacy / generic command shape, accepted on input.
    Command {
        id: String,
        #[serde(rename = "type")]
        kind: String,
        command: String,
        timeout: u64,
        #[serde(default)]
        working_directory: Option<String>,
    },

    /// Heartbeat probe to an agent (not required by any client, offered for
    /// symmetry with `Pong`).
    Ping,

    TerminalStart {
        session_id: String,
        rows: u16,
        cols: u16,
        #[serde(default)]
        working_directory: Option<String>,
    },
    TerminalInput {
        session_id: String,
        data: String,
    },
    TerminalResize {
        session_id: String,
        rows: u16,
        cols: u16,
    },
    TerminalClose {
        session_id: String,
    },
}

/// Messages exchanged between a UI client and the server over the
/// terminal-session WebSocket (distinct from the agent transport).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalMessage {
    /// UI -> server: open a session against an agent.
    Open {
        agent_id: String,
        rows: u16,
        cols: u16,
        #[serde(default)]
        working_directory: Option<String>,
    },
    /// UI -> server: keystrokes / pasted text.
    Input { session_id: String, data: String },
    /// UI -> server: terminal geometry changed.
    Resize {
        session_id: String,
        rows: u16,
        cols: u16,
    },
    /// UI -> server: keepalive.
    Ping { session_id: String },
    /// UI -> server: close the session.
    Close { session_id: String },

    /// server -> UI: session assigned.
    SessionCreated { session_id: String },
    /// server -> UI: agent output.
    Output { session_id: String, data: String },
    /// server -> UI: agent-side error output.
    Error { session_id: String, data: String },
    /// server -> UI: keepalive reply.
    Pong { session_id: String },
    /// server -> UI: session is now closed.
    Closed { session_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips_through_json() {
        let msg = AgentMessage::Register {
            id: "A1".into(),
            hostname: "H1".into(),
            ip: None,
            os: "Windows".into(),
            os_version: Some("10".into()),
            tags: vec![],
            system_info: None,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"register\""));
        let back: AgentMessage = serde_json::from_str(&text).unwrap();
        matches!(back, AgentMessage::Register { .. });
    }

    #[test]
    fn command_result_accepts_legacy_command_id() {
        let text = r#"{"type":"command_result","command_id":"r-1","success":true,"output":"ok","execution_time":0.1,"timestamp":"t"}"#;
        let msg: AgentMessage = serde_json::from_str(text).unwrap();
        match msg {
            AgentMessage::CommandResult { request_id, .. } => assert_eq!(request_id, "r-1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn powershell_command_serializes_as_canonical_type() {
        let msg = ServerMessage::PowershellCommand {
            request_id: "r-1".into(),
            command: "Get-Date".into(),
            timeout: 15,
            timestamp: "t".into(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"powershell_command\""));
    }
}
