//! # Error taxonomy
//!
//! `FleetError` covers every control-plane failure mode, uniformly mapped
//! to JSON error bodies `{error, message, details?, suggestions?}` via
//! `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("agent '{agent_id}' is not connected")]
    AgentNotConnected {
        agent_id: String,
        connected: Vec<String>,
        mock: Vec<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to send message to agent")]
    SendFailed,

    #[error("command timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let (status, error, details, suggestions) = match &self {
            FleetError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found".to_string(),
                Some(serde_json::json!({ "what": what })),
                vec![],
            ),
            FleetError::AgentNotConnected {
                agent_id,
                connected,
                mock,
            } => {
                let mut suggestions = Vec::new();
                if !mock.is_empty() {
                    suggestions.push(
                        "Use mock agents for testing by setting MOCK_AGENTS=true or ENABLE_TEST_MODE=true"
                            .to_string(),
                    );
                }
                if connected.is_empty() && mock.is_empty() {
                    suggestions.push("Ensure the agent is running and connected".to_string());
                    suggestions.push(
                        "For CI/CD testing, enable mock agents with MOCK_AGENTS=true".to_string(),
                    );
                } else if !connected.is_empty() {
                    suggestions.push(format!(
                        "Try one of the currently connected agents: {}",
                        connected.join(", ")
                    ));
                }
                (
                    StatusCode::NOT_FOUND,
                    "agent_not_connected".to_string(),
                    Some(serde_json::json!({
                        "agent_id": agent_id,
                        "available_agents": connected,
                        "mock_agents_available": mock,
                    })),
                    suggestions,
                )
            }
            FleetError::InvalidArgument(_) => {
                (StatusCode::BAD_REQUEST, "invalid_argument".to_string(), None, vec![])
            }
            FleetError::SendFailed => (
                StatusCode::BAD_GATEWAY,
                "send_failed".to_string(),
                None,
                vec!["The agent's transport rejected the message; it now appears offline".into()],
            ),
            FleetError::Timeout { after_secs } => (
                StatusCode::REQUEST_TIMEOUT,
                "timeout".to_string(),
                Some(serde_json::json!({ "after_secs": after_secs })),
                vec![
                    "Try increasing the timeout value".to_string(),
                    "Check if the command is resource-intensive".to_string(),
                ],
            ),
            FleetError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string(), None, vec![])
            }
        };

        let message = self.to_string();
        let body = ErrorBody {
            error,
            message,
            details,
            suggestions,
        };
        (status, Json(body)).into_response()
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_not_connected_surfaces_candidates() {
        let err = FleetError::AgentNotConnected {
            agent_id: "UNKNOWN".into(),
            connected: vec![],
            mock: vec![],
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
