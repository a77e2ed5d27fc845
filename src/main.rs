//! # Fleet control-plane server
//!
//! A WebSocket-based control plane for a fleet of Windows endpoints. Agents
//! attach over `/ws`, register themselves, and execute PowerShell commands
//! dispatched through the REST API; operators can also attach an
//! interactive terminal over `/agents/{id}/terminal`.
//!
//! ## Architecture
//!
//! ```text
//! REST client ──HTTP──► Fleet Server ──WS──► Agent ──PowerShell──► Windows host
//! UI client   ──WS───►  Fleet Server ──WS──► Agent (terminal session)
//! ```

use fleet_server::config::Settings;
use fleet_server::state::AppState;
use fleet_server::store::InMemoryStore;
use fleet_server::{api, handlers};

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_server=info".into()),
        )
        .init();

    let settings = Settings::load();
    let mock_agents = settings.mock_agents;
    let terminal_timeout = settings.terminal_session_timeout;
    let bind_addr = settings.bind_addr.clone();

    let store = InMemoryStore::new();
    let state = AppState::new(settings, store);

    if mock_agents {
        info!("mock agent subsystem enabled");
        fleet_server::mock::install_mock_agents(&state).await;
    }

    spawn_sweepers(state.clone(), terminal_timeout);

    let app = Router::new()
        .route("/ws", get(handlers::agent_ws))
        .route("/agents/{id}/terminal", get(handlers::terminal_ws))
        .route("/agents", get(api::list_agents))
        .route("/agents/register", post(api::register_agent))
        .route("/agents/bulk", post(api::bulk_operation))
        .route("/agents/{id}/command", post(api::run_command))
        .route("/agents/{id}/command/async", post(api::run_command_async))
        .route("/agents/{id}/refresh", post(api::refresh_agent))
        .route("/agents/{id}/status", get(api::agent_status))
        .route("/agents/{id}/history", get(api::command_history))
        .route("/commands/{request_id}", get(api::get_command_result))
        .route("/templates", get(api::list_templates))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = bind_addr.parse().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 7070)));
    info!("fleet server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Background tasks that keep long-lived maps bounded: correlator
/// retention and terminal session inactivity.
fn spawn_sweepers(state: AppState, terminal_timeout: Duration) {
    let correlator_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            correlator_state
                .correlator
                .sweep(fleet_server::config::PENDING_RETENTION);
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            state.terminal.sweep(&state.registry, terminal_timeout);
        }
    });
}
