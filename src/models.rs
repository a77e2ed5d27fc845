//! # Data model
//!
//! Plain types for every domain entity. Entities that cross the HTTP
//! boundary derive `Serialize`/`Deserialize`; purely in-memory runtime state
//! (connection sessions, pending commands) does not need to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Warning,
    Error,
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Offline
    }
}

/// A managed endpoint. `is_connected`/`connection_id` are never trusted as
/// persisted truth — callers must recompute them from the
/// [`crate::registry::ConnectionRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub hostname: String,
    pub ip: Option<String>,
    pub os: String,
    pub version: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub system_info: Option<serde_json::Value>,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, os: impl Into<String>) -> Self {
        Agent {
            id: id.into(),
            hostname: hostname.into(),
            ip: None,
            os: os.into(),
            version: None,
            tags: HashSet::new(),
            system_info: None,
            status: AgentStatus::Online,
            last_seen: Utc::now(),
        }
    }
}

/// Result of a `PendingCommand` resolving. Optionally copied to the `Store`
/// as a `CommandHistoryEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub output: String,
    /// The original, possibly-structured `output` payload an agent sent,
    /// preserved for callers that want it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub error: String,
    pub exit_code: i32,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    pub fn timeout(after_secs: u64) -> Self {
        CommandResponse {
            success: false,
            output: String::new(),
            data: None,
            error: format!("Command timed out after {after_secs}s"),
            exit_code: -1,
            execution_time: after_secs as f64,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Completed,
    Timeout,
}

/// In-memory bookkeeping for an in-flight request. The wait primitive lives
/// in the [`crate::correlator::Correlator`]'s map, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub request_id: String,
    pub agent_id: String,
    pub command: String,
    pub submitted_at: DateTime<Utc>,
    pub status: PendingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Active,
    Inactive,
    Closed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSessionInfo {
    pub session_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub status: TerminalStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub rows: u16,
    pub cols: u16,
    pub working_directory: Option<String>,
}

/// Append-only audit record, persisted through the `Store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHistoryEntry {
    pub agent_id: String,
    pub command: String,
    pub success: bool,
    pub output: String,
    pub error: String,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

/// A full terminal input line, persisted as an audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCommandEntry {
    pub session_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCommandTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: String,
    pub author: String,
    pub is_system: bool,
}

/// Classification returned by the liveness tracker and surfaced by
/// `/agents/{id}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Warning,
    Offline,
    Unknown,
}
