//! # Connection Registry
//!
//! Tracks which agents are currently attached, over which transport session.
//! Two `DashMap`s stay mutually consistent to cover the full
//! attach/bind/detach lifecycle.
//!
//! All mutations are `DashMap` operations — O(1), no I/O inside a critical
//! section.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Channel used to push messages to a connection's outbound queue. Both
/// real WebSocket connections and mock agents (see [`crate::mock`]) hold one
/// of these; the registry does not know or care which.
pub type ClientTx = mpsc::UnboundedSender<ServerMessage>;

/// A single live transport attachment.
#[derive(Clone)]
pub struct Session {
    pub connection_id: String,
    pub agent_id: Option<String>,
    pub tx: ClientTx,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub is_mock: bool,
}

/// In-memory mapping of agent-id <-> live transport session.
///
/// Two `DashMap`s are kept mutually consistent: `sessions` (connection_id ->
/// Session, carrying the reverse `agent_id` pointer) and `agent_index`
/// (agent_id -> connection_id), so both lookup directions are O(1).
#[derive(Clone)]
pub struct ConnectionRegistry {
    sessions: Arc<DashMap<String, Session>>,
    agent_index: Arc<DashMap<String, String>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            sessions: Arc::new(DashMap::new()),
            agent_index: Arc::new(DashMap::new()),
        }
    }

    /// Create a session for a freshly-accepted transport. `agent_id` is
    /// unbound until the first `register` message arrives.
    pub fn attach(&self, tx: ClientTx) -> String {
        self.attach_as(tx, false)
    }

    /// Like [`Self::attach`], but marks the session as a mock agent's
    /// synthetic connection (no real transport behind it).
    pub fn attach_as(&self, tx: ClientTx, is_mock: bool) -> String {
        let connection_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.sessions.insert(
            connection_id.clone(),
            Session {
                connection_id: connection_id.clone(),
                agent_id: None,
                tx,
                connected_at: now,
                last_heartbeat: now,
                is_mock,
            },
        );
        connection_id
    }

    /// Bind `agent_id` to `connection_id`. If another live session already
    /// holds `agent_id`, that prior binding is atomically replaced: the old
    /// session is sent a courtesy notice is left to the caller (we return
    /// its connection id so the caller — the message handler — can push a
    /// close-equivalent frame before dropping it), and its `agent_id` is
    /// cleared so it no longer resolves via `agent_index`.
    ///
    /// Atomic swap: no dangling entry survives this call.
    pub fn bind(&self, connection_id: &str, agent_id: &str) -> Option<String> {
        let evicted = self.agent_index.insert(agent_id.to_string(), connection_id.to_string());

        if let Some(session) = self.sessions.get_mut(connection_id).as_deref_mut() {
            session.agent_id = Some(agent_id.to_string());
        }

        if let Some(ref old_connection_id) = evicted {
            if old_connection_id != connection_id {
                if let Some(mut old_session) = self.sessions.get_mut(old_connection_id) {
                    old_session.agent_id = None;
                }
                debug!(
                    agent_id,
                    old_connection_id, new_connection_id = connection_id, "agent binding replaced"
                );
            }
        }

        evicted.filter(|old| old != connection_id)
    }

    /// Remove a session in both directions. Idempotent — a second call on an
    /// already-removed id is a no-op.
    pub fn detach(&self, connection_id: &str) {
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            if let Some(agent_id) = session.agent_id {
                // Only clear the agent_index entry if it still points at us —
                // a newer binding may have already replaced it.
                self.agent_index
                    .remove_if(&agent_id, |_, cid| cid == connection_id);
            }
        }
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        self.agent_index.contains_key(agent_id)
    }

    pub fn session_of(&self, agent_id: &str) -> Option<Session> {
        let connection_id = self.agent_index.get(agent_id)?.clone();
        self.sessions.get(&connection_id).map(|s| s.clone())
    }

    pub fn connection(&self, connection_id: &str) -> Option<Session> {
        self.sessions.get(connection_id).map(|s| s.clone())
    }

    pub fn connected_agents(&self) -> Vec<String> {
        self.agent_index.iter().map(|e| e.key().clone()).collect()
    }

    pub fn heartbeat(&self, connection_id: &str, at: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(connection_id) {
            session.last_heartbeat = at;
        }
    }

    /// Send a message to the agent's current session. Returns `false` (and
    /// detaches the session) if there is no session or the send failed.
    pub fn send(&self, agent_id: &str, message: ServerMessage) -> bool {
        let Some(connection_id) = self.agent_index.get(agent_id).map(|e| e.clone()) else {
            return false;
        };
        let Some(session) = self.sessions.get(&connection_id).map(|s| s.clone()) else {
            return false;
        };
        match session.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                warn!(agent_id, "send failed, detaching session");
                self.detach(&connection_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (ClientTx, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn at_most_one_session_per_agent() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = registry.attach(tx1);
        let c2 = registry.attach(tx2);

        registry.bind(&c1, "A1");
        let evicted = registry.bind(&c2, "A1");

        assert_eq!(evicted.as_deref(), Some(c1.as_str()));
        assert_eq!(registry.session_of("A1").unwrap().connection_id, c2);
        // the old session is still attached, just unbound
        assert!(registry.connection(&c1).is_some());
        assert!(registry.connection(&c1).unwrap().agent_id.is_none());
    }

    #[test]
    fn detach_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let c1 = registry.attach(tx);
        registry.bind(&c1, "A1");

        registry.detach(&c1);
        registry.detach(&c1);

        assert!(!registry.is_connected("A1"));
    }

    #[test]
    fn send_failure_detaches_session() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = channel();
        let c1 = registry.attach(tx);
        registry.bind(&c1, "A1");
        drop(rx);

        let ok = registry.send(
            "A1",
            ServerMessage::Ping,
        );
        assert!(!ok);
        assert!(!registry.is_connected("A1"));
    }
}
