//! # REST API
//!
//! HTTP surface over the Dispatcher, Bulk Operator, and Store. Every
//! handler is a thin translation layer: decode the request, call into the
//! matching core module, map the result into a response body. No business
//! logic lives here.

use crate::bulk::{self, BulkArgs, BulkOperation};
use crate::dispatcher::{self, CommandLookup};
use crate::error::{FleetError, FleetResult};
use crate::models::{Agent, AgentStatus, Liveness};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ListAgentsParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub dedup: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub connected: bool,
    pub liveness: Liveness,
}

fn to_view(state: &AppState, agent: Agent) -> AgentView {
    let connected = state.registry.is_connected(&agent.id);
    let liveness = crate::liveness::classify(connected, Some(agent.last_seen), chrono::Utc::now());
    AgentView {
        agent,
        connected,
        liveness,
    }
}

/// `GET /agents`
pub async fn list_agents(
    State(state): State<AppState>,
    Query(params): Query<ListAgentsParams>,
) -> Json<Vec<AgentView>> {
    let mut agents = state.store.list_agents().await;
    if params.dedup.unwrap_or(true) {
        agents = crate::store::dedup_by_hostname(agents);
    }
    if let Some(status) = params.status.as_deref() {
        agents.retain(|a| format!("{:?}", a.status).to_lowercase() == status.to_lowercase());
    }
    Json(agents.into_iter().map(|a| to_view(&state, a)).collect())
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub os: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST /agents/register` — out-of-band registration, independent of the
/// agent transport's own `register` frame (used by provisioning tooling
/// that wants a row to exist before the agent ever connects).
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Json<Agent> {
    let mut agent = state.store.get_agent(&req.id).await.unwrap_or_else(|| Agent::new(&req.id, &req.hostname, &req.os));
    agent.hostname = req.hostname;
    agent.ip = req.ip;
    agent.os = req.os;
    agent.version = req.version;
    agent.tags = req.tags.into_iter().collect();
    state.store.upsert_agent(agent.clone()).await;
    Json(agent)
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CommandAcceptedResponse {
    pub request_id: String,
}

/// `POST /agents/{id}/command` — synchronous execution.
pub async fn run_command(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> FleetResult<Json<crate::models::CommandResponse>> {
    let response = dispatcher::execute(
        &state,
        &agent_id,
        &req.command,
        req.timeout.map(Duration::from_secs),
    )
    .await?;
    Ok(Json(response))
}

/// `POST /agents/{id}/command/async` — fire-and-forget, poll via
/// `GET /commands/{request_id}`.
pub async fn run_command_async(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> FleetResult<Json<CommandAcceptedResponse>> {
    let request_id = dispatcher::submit(
        &state,
        &agent_id,
        &req.command,
        req.timeout.map(Duration::from_secs),
    )
    .await?;
    Ok(Json(CommandAcceptedResponse { request_id }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandLookupView {
    Pending,
    Resolved {
        #[serde(flatten)]
        response: crate::models::CommandResponse,
    },
}

/// `GET /commands/{request_id}`
pub async fn get_command_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> FleetResult<Json<CommandLookupView>> {
    match dispatcher::get_result(&state, &request_id) {
        CommandLookup::Resolved(response) => Ok(Json(CommandLookupView::Resolved { response })),
        CommandLookup::Pending => Ok(Json(CommandLookupView::Pending)),
        CommandLookup::Unknown => Err(FleetError::NotFound(format!("command '{request_id}'"))),
    }
}

/// `POST /agents/{id}/refresh` — single-agent convenience wrapper over the
/// Bulk Operator's `refresh` operation.
pub async fn refresh_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> FleetResult<Json<crate::bulk::BulkResult>> {
    Ok(Json(bulk::run(&state, &[agent_id], BulkOperation::Refresh, None).await?))
}

#[derive(Debug, Serialize)]
pub struct AgentStatusResponse {
    pub agent_id: String,
    pub connected: bool,
    pub liveness: Liveness,
    pub status: AgentStatus,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

/// `GET /agents/{id}/status`
pub async fn agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> FleetResult<Json<AgentStatusResponse>> {
    let agent = state
        .store
        .get_agent(&agent_id)
        .await
        .ok_or_else(|| FleetError::NotFound(format!("agent '{agent_id}'")))?;
    let connected = state.registry.is_connected(&agent_id);
    let liveness = crate::liveness::classify(connected, Some(agent.last_seen), chrono::Utc::now());
    Ok(Json(AgentStatusResponse {
        agent_id,
        connected,
        liveness,
        status: agent.status,
        last_seen: Some(agent.last_seen),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub agent_ids: Vec<String>,
    pub operation: BulkOperation,
    #[serde(default)]
    pub args: Option<BulkArgs>,
}

/// `POST /agents/bulk`
pub async fn bulk_operation(
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> FleetResult<Json<crate::bulk::BulkResult>> {
    Ok(Json(bulk::run(&state, &req.agent_ids, req.operation, req.args).await?))
}

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<crate::models::SavedCommandTemplate>,
}

/// `GET /templates` — saved PowerShell command templates operators can
/// replay against a fleet.
pub async fn list_templates(State(state): State<AppState>) -> Json<TemplateListResponse> {
    Json(TemplateListResponse {
        templates: state.store.list_templates().await,
    })
}

/// `GET /agents/{id}/history` — command history, most recent first.
pub async fn command_history(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Json<Vec<crate::models::CommandHistoryEntry>> {
    Json(state.store.command_history(&agent_id, 100).await)
}
