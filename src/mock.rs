//! # Mock agent subsystem
//!
//! Synthetic agents for exercising the fleet without real Windows endpoints.
//! A mock agent is bound into the [`crate::registry::ConnectionRegistry`]
//! exactly like a real one, with its own `mpsc` channel and a background
//! task standing in for the missing WebSocket. Commands addressed to it
//! travel through [`crate::dispatcher`]/[`crate::messages::handle_inbound`]
//! unmodified — there is no separate "mock path" in either of those
//! modules.

use crate::state::AppState;
use chrono::Utc;
use dashmap::DashMap;
use fleet_protocol::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Seed description for a mock agent, independent of whether it is
/// currently "online" (installed and running its response task).
#[derive(Debug, Clone)]
pub struct MockAgentSpec {
    pub id: &'static str,
    pub hostname: &'static str,
    pub os: &'static str,
    pub version: &'static str,
    pub online: bool,
}

/// The seed fleet installed when `MOCK_AGENTS`/`ENABLE_TEST_MODE` is set:
/// two online agents and one left offline to exercise the not-connected
/// path.
pub fn default_agents() -> Vec<MockAgentSpec> {
    vec![
        MockAgentSpec {
            id: "mock-agent-001",
            hostname: "MOCK-WORKSTATION-01",
            os: "Windows 11 Pro",
            version: "23H2",
            online: true,
        },
        MockAgentSpec {
            id: "mock-agent-002",
            hostname: "MOCK-SERVER-01",
            os: "Windows Server 2022",
            version: "21H2",
            online: true,
        },
        MockAgentSpec {
            id: "mock-agent-003",
            hostname: "MOCK-WORKSTATION-02",
            os: "Windows 10 Pro",
            version: "22H2",
            online: false,
        },
    ]
}

/// Registry of mock agent ids, consulted by [`crate::error::FleetError::AgentNotConnected`]
/// to suggest a reachable stand-in when a caller addresses a real agent id
/// that isn't connected.
#[derive(Clone, Default)]
pub struct MockRegistry {
    known: Arc<DashMap<String, MockAgentSpec>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        MockRegistry::default()
    }

    pub fn register(&self, spec: MockAgentSpec) {
        self.known.insert(spec.id.to_string(), spec);
    }

    pub fn known_ids(&self) -> Vec<String> {
        self.known.iter().map(|e| e.key().clone()).collect()
    }
}

/// Install the seed mock fleet into `state`: upsert each agent's record,
/// and for every `online` one, attach a registry session backed by a
/// background task that answers commands.
pub async fn install_mock_agents(state: &AppState) {
    for spec in default_agents() {
        state.mock.register(spec.clone());

        let mut agent = crate::models::Agent::new(spec.id, spec.hostname, spec.os);
        agent.version = Some(spec.version.to_string());
        agent.status = if spec.online {
            crate::models::AgentStatus::Online
        } else {
            crate::models::AgentStatus::Offline
        };
        state.store.upsert_agent(agent).await;

        if !spec.online {
            continue;
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let connection_id = state.registry.attach_as(tx, true);
        state.registry.bind(&connection_id, spec.id);
        info!(agent_id = spec.id, "mock agent online");

        let state = state.clone();
        let connection_id_task = connection_id.clone();
        tokio::spawn(run_mock_agent(state, connection_id_task, rx));
    }
}

/// Background task standing in for a mock agent's WebSocket read loop:
/// reads whatever the Dispatcher sent it, synthesizes a plausible
/// `AgentMessage::CommandResult`, and feeds it back through
/// [`crate::messages::record_command_result`] — the exact helper the real
/// agent path uses.
async fn run_mock_agent(
    state: AppState,
    connection_id: String,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            ServerMessage::PowershellCommand { request_id, command, .. }
            | ServerMessage::Command {
                id: request_id,
                command,
                ..
            } => {
                let delay = simulated_delay(&command);
                tokio::time::sleep(delay).await;
                let (success, output, error, exit_code) = simulate_response(&command);
                crate::messages::record_command_result(
                    &state,
                    &connection_id,
                    &request_id,
                    success,
                    serde_json::Value::String(output),
                    error,
                    Some(exit_code),
                    delay.as_secs_f64(),
                    &Utc::now().to_rfc3339(),
                    None,
                )
                .await;
            }
            ServerMessage::TerminalStart { session_id, .. } => {
                state
                    .terminal
                    .handle_agent_output(&session_id, "Mock PowerShell 7.4\r\nPS C:\\> ".into())
                    .await;
            }
            ServerMessage::TerminalInput { session_id, data } => {
                state
                    .terminal
                    .handle_agent_output(&session_id, format!("{data}\r\nPS C:\\> "))
                    .await;
            }
            ServerMessage::TerminalClose { session_id } => {
                state.terminal.handle_agent_closed(&session_id).await;
            }
            ServerMessage::Welcome { .. }
            | ServerMessage::Ping
            | ServerMessage::TerminalResize { .. } => {}
        }
    }
}

/// A short, length-proportional delay so mock responses don't resolve
/// instantaneously.
fn simulated_delay(command: &str) -> Duration {
    let millis = (command.len() as u64 * 5).clamp(50, 400);
    Duration::from_millis(millis)
}

/// Deterministic canned responses keyed by command prefix, covering a
/// handful of common PowerShell verbs.
fn simulate_response(command: &str) -> (bool, String, Option<String>, i32) {
    let normalized = command.trim();
    let lower = normalized.to_lowercase();

    if lower.contains("error") || lower.contains("fail") {
        return (
            false,
            String::new(),
            Some(format!("The term '{normalized}' is not recognized as a valid command")),
            1,
        );
    }

    if lower.starts_with("get-process") {
        return (
            true,
            "ProcessName    Id    CPU\n-----------    --    ---\nsvchost       1044   2.31\nexplorer      2208   5.87\n"
                .to_string(),
            None,
            0,
        );
    }

    if lower.starts_with("get-service") || lower.starts_with("restart-service") {
        return (
            true,
            "Status   Name               DisplayName\n------   ----               -----------\nRunning  W32Time            Windows Time\n".to_string(),
            None,
            0,
        );
    }

    if lower.starts_with("get-eventlog") || lower.starts_with("get-winevent") {
        return (
            true,
            "Index Time          EntryType   Source             Message\n----- ----          ---------   ------             -------\n1     10:02:14      Information Service Control  Service entered running state\n".to_string(),
            None,
            0,
        );
    }

    if lower.starts_with("test-connection") || lower.starts_with("ping") {
        return (
            true,
            "Source   Destination  Bytes  Time(ms)\n------   -----------  -----  --------\nMOCK     8.8.8.8      32     12\n".to_string(),
            None,
            0,
        );
    }

    if lower.starts_with("get-disk") || lower.starts_with("get-volume") {
        return (
            true,
            "DriveLetter FileSystemLabel Size   SizeRemaining\n----------- --------------- ----   -------------\nC           Windows         512GB  201GB\n".to_string(),
            None,
            0,
        );
    }

    if lower.starts_with("get-computerinfo") || lower.contains("hostname") {
        return (
            true,
            "WindowsProductName : Windows 11 Pro\nCsName             : MOCK-WORKSTATION-01\n".to_string(),
            None,
            0,
        );
    }

    (true, format!("Executed: {normalized}"), None, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_error_marker_fails_deterministically() {
        let (success, _, error, exit_code) = simulate_response("Invoke-ErrorCommand");
        assert!(!success);
        assert_eq!(exit_code, 1);
        assert!(error.is_some());
    }

    #[test]
    fn get_process_succeeds() {
        let (success, output, error, exit_code) = simulate_response("Get-Process");
        assert!(success);
        assert!(output.contains("ProcessName"));
        assert!(error.is_none());
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn default_fleet_has_one_offline_agent() {
        let agents = default_agents();
        assert_eq!(agents.iter().filter(|a| !a.online).count(), 1);
    }

    #[test]
    fn delay_scales_with_command_length_within_bounds() {
        let short = simulated_delay("Get-Date");
        let long = simulated_delay(&"Get-Process ".repeat(20));
        assert!(short <= long);
        assert!(long <= Duration::from_millis(400));
    }
}
