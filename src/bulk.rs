//! # Bulk operator
//!
//! Fans a single operation out across many agents and accounts for
//! per-agent success/failure independently — one agent's failure never
//! aborts the others. Built on top of [`crate::dispatcher`] and the
//! [`crate::registry::ConnectionRegistry`]; it has no transport or
//! correlation logic of its own.

use crate::error::{FleetError, FleetResult};
use crate::models::AgentStatus;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Refresh,
    Restart,
    Shutdown,
    Status,
    UpdateTags,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub operation: BulkOperation,
    pub total: usize,
    pub successful: Vec<String>,
    pub failed: Vec<BulkFailure>,
    pub results: HashMap<String, String>,
}

/// Arguments accepted by operations that need them (`update_tags`); unused
/// by the others.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkArgs {
    #[serde(default)]
    pub tags: Vec<String>,
}

enum BulkOutcome {
    Success { detail: String },
    Failure { error: String },
}

pub async fn run(
    state: &AppState,
    agent_ids: &[String],
    operation: BulkOperation,
    args: Option<BulkArgs>,
) -> FleetResult<BulkResult> {
    if agent_ids.is_empty() {
        return Err(FleetError::InvalidArgument("agent_ids must not be empty".to_string()));
    }

    let mut successful = Vec::new();
    let mut failed = Vec::new();
    let mut results = HashMap::new();

    for agent_id in agent_ids {
        let outcome = match operation {
            BulkOperation::Refresh => refresh_one(state, agent_id).await,
            BulkOperation::Restart => command_one(state, agent_id, "Restart-Computer -Force").await,
            BulkOperation::Shutdown => command_one(state, agent_id, "Stop-Computer -Force").await,
            BulkOperation::Status => status_one(state, agent_id).await,
            BulkOperation::UpdateTags => {
                update_tags_one(state, agent_id, args.as_ref().map(|a| a.tags.as_slice()).unwrap_or(&[])).await
            }
        };
        match outcome {
            BulkOutcome::Success { detail } => {
                results.insert(agent_id.clone(), detail);
                successful.push(agent_id.clone());
            }
            BulkOutcome::Failure { error } => {
                results.insert(agent_id.clone(), error.clone());
                failed.push(BulkFailure {
                    id: agent_id.clone(),
                    error,
                });
            }
        }
    }

    Ok(BulkResult {
        operation,
        total: agent_ids.len(),
        successful,
        failed,
        results,
    })
}

/// Restart/shutdown are privileged, long-running commands — submit and hand
/// back the `request_id` rather than blocking on the agent rebooting.
async fn command_one(state: &AppState, agent_id: &str, command: &str) -> BulkOutcome {
    match crate::dispatcher::submit(state, agent_id, command, None).await {
        Ok(request_id) => BulkOutcome::Success { detail: request_id },
        Err(err) => BulkOutcome::Failure { error: err.to_string() },
    }
}

/// Refreshing a known-but-disconnected agent is not a failure: it always
/// succeeds and records the agent's current reachability.
async fn refresh_one(state: &AppState, agent_id: &str) -> BulkOutcome {
    let Some(mut agent) = state.store.get_agent(agent_id).await else {
        return BulkOutcome::Failure {
            error: "Agent not found".to_string(),
        };
    };

    let attached = state.registry.is_connected(agent_id);
    if attached {
        let _ = crate::dispatcher::execute(state, agent_id, "Get-ComputerInfo", Some(Duration::from_secs(5))).await;
    }

    agent.status = if attached { AgentStatus::Online } else { AgentStatus::Offline };
    agent.last_seen = chrono::Utc::now();
    state.store.upsert_agent(agent).await;

    BulkOutcome::Success {
        detail: if attached { "online".to_string() } else { "offline".to_string() },
    }
}

async fn status_one(state: &AppState, agent_id: &str) -> BulkOutcome {
    let attached = state.registry.is_connected(agent_id);
    let last_seen = state.store.get_agent(agent_id).await.map(|a| a.last_seen);
    let liveness = crate::liveness::classify(attached, last_seen, chrono::Utc::now());
    BulkOutcome::Success {
        detail: format!("{liveness:?}").to_lowercase(),
    }
}

async fn update_tags_one(state: &AppState, agent_id: &str, tags: &[String]) -> BulkOutcome {
    let Some(mut agent) = state.store.get_agent(agent_id).await else {
        return BulkOutcome::Failure {
            error: "agent has no stored record".to_string(),
        };
    };
    agent.tags = tags.iter().cloned().collect::<HashSet<_>>();
    state.store.upsert_agent(agent).await;
    BulkOutcome::Success {
        detail: "tags updated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::Agent;
    use crate::store::InMemoryStore;

    fn test_state() -> AppState {
        AppState::new(Settings::for_tests(), InMemoryStore::new())
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let state = test_state();
        state.store.upsert_agent(Agent::new("A1", "H1", "Windows")).await;

        let result = run(
            &state,
            &["A1".to_string(), "GHOST".to_string()],
            BulkOperation::Status,
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.successful.len(), 2);
    }

    #[tokio::test]
    async fn restart_against_unconnected_agent_fails_independently() {
        let state = test_state();
        let result = run(
            &state,
            &["A1".to_string(), "A2".to_string()],
            BulkOperation::Restart,
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.failed.len(), 2);
        assert_eq!(result.successful.len(), 0);
    }

    #[tokio::test]
    async fn update_tags_replaces_tag_set() {
        let state = test_state();
        state.store.upsert_agent(Agent::new("A1", "H1", "Windows")).await;
        let args = BulkArgs {
            tags: vec!["prod".to_string()],
        };
        let result = run(&state, &["A1".to_string()], BulkOperation::UpdateTags, Some(args))
            .await
            .unwrap();
        assert!(result.successful.contains(&"A1".to_string()));
        let agent = state.store.get_agent("A1").await.unwrap();
        assert!(agent.tags.contains("prod"));
    }

    #[tokio::test]
    async fn refresh_disconnected_known_agent_succeeds_as_offline() {
        let state = test_state();
        state.store.upsert_agent(Agent::new("A2", "H2", "Windows")).await;

        let result = run(&state, &["A2".to_string()], BulkOperation::Refresh, None)
            .await
            .unwrap();

        assert!(result.successful.contains(&"A2".to_string()));
        let agent = state.store.get_agent("A2").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn refresh_unknown_agent_fails_with_agent_not_found() {
        let state = test_state();
        let result = run(&state, &["UNKNOWN".to_string()], BulkOperation::Refresh, None)
            .await
            .unwrap();

        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error, "Agent not found");
    }

    #[tokio::test]
    async fn empty_agent_list_is_an_invalid_argument() {
        let state = test_state();
        let err = run(&state, &[], BulkOperation::Status, None).await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidArgument(_)));
    }
}
