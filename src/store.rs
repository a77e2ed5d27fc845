//! # Store
//!
//! Opaque persistence for agents, command history, and saved command
//! templates. The core depends only on this trait — never on a concrete SQL
//! driver — so the choice of backend is an initialization-time concern, not
//! runtime polymorphism scattered through callers.
//!
//! [`InMemoryStore`] is the only implementation shipped here (sufficient for
//! the mock-agent test-mode facility and for the integration tests); a
//! production deployment would swap in a `sqlx`-backed Postgres/SQLite
//! implementation behind the same trait.

use crate::models::{Agent, CommandHistoryEntry, SavedCommandTemplate, TerminalCommandEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct AgentListFilter {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_desc: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_agent(&self, agent: Agent);
    async fn get_agent(&self, id: &str) -> Option<Agent>;
    async fn delete_agent(&self, id: &str) -> bool;
    /// All agent rows. Deduplication by hostname is a read-side concern
    /// performed by the caller — this returns the raw rows.
    async fn list_agents(&self) -> Vec<Agent>;

    async fn append_command_history(&self, entry: CommandHistoryEntry);
    /// Command history for one agent, most recent first, limited to
    /// `limit` rows.
    async fn command_history(&self, agent_id: &str, limit: usize) -> Vec<CommandHistoryEntry>;

    async fn append_terminal_command(&self, entry: TerminalCommandEntry);
    async fn terminal_history(&self, session_id: &str) -> Vec<TerminalCommandEntry>;

    async fn list_templates(&self) -> Vec<SavedCommandTemplate>;
    async fn get_template(&self, id: &str) -> Option<SavedCommandTemplate>;
    async fn upsert_template(&self, template: SavedCommandTemplate);
    /// Returns `false` without deleting if the template `is_system`: system
    /// templates cannot be deleted via the public API.
    async fn delete_template(&self, id: &str) -> bool;
}

/// Lock-striped, `DashMap`-backed implementation. There is no connection
/// pool to size: each operation is an independent O(1) map access, so
/// there is no contention to bound.
#[derive(Default)]
pub struct InMemoryStore {
    agents: DashMap<String, Agent>,
    command_history: DashMap<String, Vec<CommandHistoryEntry>>,
    terminal_history: DashMap<String, Vec<TerminalCommandEntry>>,
    templates: DashMap<String, SavedCommandTemplate>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(InMemoryStore::default());
        for template in crate::templates::default_templates() {
            store.templates.insert(template.id.clone(), template);
        }
        store
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_agent(&self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    async fn get_agent(&self, id: &str) -> Option<Agent> {
        self.agents.get(id).map(|a| a.clone())
    }

    async fn delete_agent(&self, id: &str) -> bool {
        self.agents.remove(id).is_some()
    }

    async fn list_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    async fn append_command_history(&self, entry: CommandHistoryEntry) {
        self.command_history
            .entry(entry.agent_id.clone())
            .or_default()
            .push(entry);
    }

    async fn command_history(&self, agent_id: &str, limit: usize) -> Vec<CommandHistoryEntry> {
        let Some(entries) = self.command_history.get(agent_id) else {
            return Vec::new();
        };
        let mut rows: Vec<CommandHistoryEntry> = entries.clone();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        rows
    }

    async fn append_terminal_command(&self, entry: TerminalCommandEntry) {
        self.terminal_history
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry);
    }

    async fn terminal_history(&self, session_id: &str) -> Vec<TerminalCommandEntry> {
        self.terminal_history
            .get(session_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    async fn list_templates(&self) -> Vec<SavedCommandTemplate> {
        self.templates.iter().map(|e| e.value().clone()).collect()
    }

    async fn get_template(&self, id: &str) -> Option<SavedCommandTemplate> {
        self.templates.get(id).map(|t| t.clone())
    }

    async fn upsert_template(&self, template: SavedCommandTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    async fn delete_template(&self, id: &str) -> bool {
        if let Some(t) = self.templates.get(id) {
            if t.is_system {
                return false;
            }
        }
        self.templates.remove(id).is_some()
    }
}

/// Deduplicate agent rows by hostname, keeping the row with the greatest
/// `last_seen`.
pub fn dedup_by_hostname(mut agents: Vec<Agent>) -> Vec<Agent> {
    use std::collections::HashMap;

    let mut best: HashMap<String, Agent> = HashMap::new();
    agents.drain(..).for_each(|agent| {
        best.entry(agent.hostname.clone())
            .and_modify(|existing| {
                if agent.last_seen > existing.last_seen {
                    *existing = agent.clone();
                }
            })
            .or_insert(agent);
    });
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentStatus;
    use chrono::{Duration, Utc};

    fn agent_at(id: &str, hostname: &str, offset_secs: i64) -> Agent {
        let mut a = Agent::new(id, hostname, "Windows");
        a.status = AgentStatus::Online;
        a.last_seen = Utc::now() + Duration::seconds(offset_secs);
        a
    }

    #[test]
    fn dedup_keeps_greatest_last_seen() {
        let agents = vec![
            agent_at("a", "H", 0),
            agent_at("b", "H", 1),
            agent_at("c", "H", 2),
        ];
        let deduped = dedup_by_hostname(agents);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, "c");
    }

    #[tokio::test]
    async fn system_templates_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let system_template = SavedCommandTemplate {
            id: "sys-1".into(),
            name: "System".into(),
            description: String::new(),
            category: "system".into(),
            command: "Get-Date".into(),
            parameters: vec![],
            tags: vec![],
            version: "1.0".into(),
            author: "system".into(),
            is_system: true,
        };
        store.upsert_template(system_template).await;
        assert!(!store.delete_template("sys-1").await);
        assert!(store.get_template("sys-1").await.is_some());
    }
}
