//! End-to-end scenarios exercising the fleet server's modules together:
//! a simulated agent transport (a plain `mpsc` channel standing in for the
//! WebSocket), the dispatcher, the correlator, the store, and the
//! terminal session manager.

use chrono::{Duration as ChronoDuration, Utc};
use fleet_server::bulk::{self, BulkOperation};
use fleet_server::config::Settings;
use fleet_server::dispatcher::{self, CommandLookup};
use fleet_server::error::FleetError;
use fleet_server::messages::record_command_result;
use fleet_server::models::Agent;
use fleet_server::state::AppState;
use fleet_server::store::{dedup_by_hostname, InMemoryStore};
use std::time::Duration;

fn test_state() -> AppState {
    AppState::new(Settings::for_tests(), InMemoryStore::new())
}

fn attach_agent(state: &AppState, agent_id: &str) -> (String, tokio::sync::mpsc::UnboundedReceiver<fleet_protocol::ServerMessage>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let connection_id = state.registry.attach(tx);
    state.registry.bind(&connection_id, agent_id);
    (connection_id, rx)
}

/// Connect, register, dispatch, reply.
#[tokio::test]
async fn connect_register_dispatch_reply() {
    let state = test_state();
    state.store.upsert_agent(Agent::new("A1", "H1", "Windows")).await;
    let (connection_id, mut rx) = attach_agent(&state, "A1");

    let state_for_agent = state.clone();
    let agent_task = tokio::spawn(async move {
        let fleet_protocol::ServerMessage::PowershellCommand { request_id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a powershell_command");
        };
        record_command_result(
            &state_for_agent,
            &connection_id,
            &request_id,
            true,
            serde_json::Value::String("2024-01-01".into()),
            None,
            Some(0),
            0.1,
            &Utc::now().to_rfc3339(),
            None,
        )
        .await;
    });

    let response = dispatcher::execute(&state, "A1", "Get-Date", None).await.unwrap();
    assert!(response.success);
    assert_eq!(response.output, "2024-01-01");
    assert_eq!(response.exit_code, 0);
    assert!((response.execution_time - 0.1).abs() < f64::EPSILON);

    agent_task.await.unwrap();
}

/// Disconnected agent, mocks disabled.
#[tokio::test]
async fn disconnected_agent_reports_not_connected() {
    let state = test_state();
    let err = dispatcher::execute(&state, "UNKNOWN", "x", None).await.unwrap_err();
    match err {
        FleetError::AgentNotConnected { connected, mock, .. } => {
            assert!(connected.is_empty());
            assert!(mock.is_empty());
        }
        other => panic!("expected AgentNotConnected, got {other:?}"),
    }
}

/// Timeout, then a late reply that must not overwrite the cached result.
#[tokio::test]
async fn timeout_then_late_arrival_does_not_overwrite() {
    let state = test_state();
    let (connection_id, mut rx) = attach_agent(&state, "A1");

    let execute = dispatcher::execute(&state, "A1", "sleep", Some(Duration::from_millis(100)));
    let (response, sent) = tokio::join!(execute, rx.recv());
    let response = response.unwrap();
    assert!(!response.success);
    assert!(response.error.contains("timed out"));

    let fleet_protocol::ServerMessage::PowershellCommand { request_id, .. } = sent.unwrap() else {
        panic!("expected a powershell_command");
    };

    // The agent's reply arrives after the timeout already resolved the
    // request; it must be dropped rather than overwrite the cached result.
    record_command_result(
        &state,
        &connection_id,
        &request_id,
        true,
        serde_json::Value::String("late".into()),
        None,
        Some(0),
        0.1,
        &Utc::now().to_rfc3339(),
        None,
    )
    .await;

    match dispatcher::get_result(&state, &request_id) {
        CommandLookup::Resolved(cached) => {
            assert!(!cached.success);
            assert!(cached.error.contains("timed out"));
        }
        other => panic!("expected the cached timeout result, got {other:?}"),
    }
}

/// Hostname dedup keeps the greatest `last_seen` row.
#[tokio::test]
async fn hostname_dedup_keeps_latest() {
    let now = Utc::now();
    let mut a = Agent::new("a", "H", "Windows");
    a.last_seen = now;
    let mut b = Agent::new("b", "H", "Windows");
    b.last_seen = now + ChronoDuration::seconds(1);
    let mut c = Agent::new("c", "H", "Windows");
    c.last_seen = now + ChronoDuration::seconds(2);

    let deduped = dedup_by_hostname(vec![a, b, c]);
    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].id, "c");
}

/// Bulk refresh with a mix of connected, disconnected, and unknown ids: a
/// known-but-disconnected agent still lands in `successful` with its status
/// written `offline`, and only a truly unknown id fails.
#[tokio::test]
async fn bulk_refresh_accounts_for_every_agent_independently() {
    let state = test_state();
    state.store.upsert_agent(Agent::new("A1", "H1", "Windows")).await;
    state.store.upsert_agent(Agent::new("A2", "H2", "Windows")).await;
    let (connection_id, mut rx) = attach_agent(&state, "A1");

    let state_for_agent = state.clone();
    let agent_task = tokio::spawn(async move {
        let fleet_protocol::ServerMessage::PowershellCommand { request_id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a powershell_command");
        };
        record_command_result(
            &state_for_agent,
            &connection_id,
            &request_id,
            true,
            serde_json::Value::String("computer info".into()),
            None,
            Some(0),
            0.2,
            &Utc::now().to_rfc3339(),
            None,
        )
        .await;
    });

    let result = bulk::run(
        &state,
        &["A1".to_string(), "UNKNOWN".to_string(), "A2".to_string()],
        BulkOperation::Refresh,
        None,
    )
    .await
    .unwrap();

    agent_task.await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.successful, vec!["A1".to_string(), "A2".to_string()]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, "UNKNOWN");
    assert_eq!(result.failed[0].error, "Agent not found");

    let a2 = state.store.get_agent("A2").await.unwrap();
    assert_eq!(a2.status, fleet_server::models::AgentStatus::Offline);
}

/// Terminal session round trip — open, input recorded as history, agent
/// output observed, close tears the session down.
#[tokio::test]
async fn terminal_session_round_trip() {
    let state = test_state();
    let (agent_tx, mut agent_rx) = tokio::sync::mpsc::unbounded_channel();
    let connection_id = state.registry.attach(agent_tx);
    state.registry.bind(&connection_id, "A1");

    let (ui_tx, mut ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let session_id = state
        .terminal
        .create_session(&state.registry, "A1", "operator-1", 24, 80, None, ui_tx)
        .expect("agent is connected");

    let fleet_protocol::ServerMessage::TerminalStart { session_id: opened, .. } = agent_rx.recv().await.unwrap() else {
        panic!("expected terminal_start");
    };
    assert_eq!(opened, session_id);

    state
        .terminal
        .handle_ui_input(&state.registry, &state.store, &session_id, "dir\r".to_string())
        .await;

    let history = state.store.terminal_history(&session_id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command, "dir");

    state
        .terminal
        .handle_agent_output(&session_id, "Directory of C:\\".to_string())
        .await;

    let forwarded = ui_rx.recv().await.unwrap();
    match forwarded {
        fleet_protocol::TerminalMessage::Output { data, .. } => assert!(data.contains("Directory")),
        other => panic!("expected output, got {other:?}"),
    }

    state.terminal.close(&state.registry, &session_id);
    assert!(state.terminal.session_info(&session_id).is_none());
}

/// At most one live session per agent-id, even under a rapid re-register
/// from a second transport.
#[tokio::test]
async fn at_most_one_session_survives_rebind() {
    let state = test_state();
    let (c1, _rx1) = attach_agent(&state, "A1");
    let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
    let c2 = state.registry.attach(tx2);
    let evicted = state.registry.bind(&c2, "A1");

    assert_eq!(evicted.as_deref(), Some(c1.as_str()));
    assert_eq!(state.registry.session_of("A1").unwrap().connection_id, c2);
}

/// Boundary: timeout requests are clamped into [1s, 300s].
#[tokio::test]
async fn timeout_is_clamped_at_the_boundaries() {
    assert_eq!(Settings::clamp_timeout(Duration::from_secs(0)), Duration::from_secs(1));
    assert_eq!(Settings::clamp_timeout(Duration::from_secs(10_000)), Duration::from_secs(300));
}

/// Async submit + poll observes Pending, then Resolved, matching the
/// `GET /commands/{request_id}` contract.
#[tokio::test]
async fn async_submit_is_pollable() {
    let state = test_state();
    let (connection_id, mut rx) = attach_agent(&state, "A1");

    let request_id = dispatcher::submit(&state, "A1", "Get-Date", None).await.unwrap();
    assert!(matches!(dispatcher::get_result(&state, &request_id), CommandLookup::Pending));

    let fleet_protocol::ServerMessage::PowershellCommand { request_id: rid, .. } = rx.recv().await.unwrap() else {
        panic!("expected a powershell_command");
    };
    assert_eq!(rid, request_id);

    record_command_result(
        &state,
        &connection_id,
        &request_id,
        true,
        serde_json::Value::String("ok".into()),
        None,
        Some(0),
        0.05,
        &Utc::now().to_rfc3339(),
        None,
    )
    .await;

    match dispatcher::get_result(&state, &request_id) {
        CommandLookup::Resolved(response) => assert!(response.success),
        other => panic!("expected resolved, got {other:?}"),
    }
}
