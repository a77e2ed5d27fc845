//! # Terminal session manager
//!
//! Interactive PowerShell sessions multiplexed over the agent transport: a
//! ring buffer of recent output per session (so a UI client that
//! reconnects mid-session isn't starved), a per-session command history for
//! audit, and an inactivity sweeper that closes abandoned sessions.
//!
//! A session has two independent "wires": the agent side (driven through
//! the [`crate::registry::ConnectionRegistry`], same as any other agent
//! message) and the UI side (an `mpsc` channel owned by the WebSocket
//! handler that accepted the UI's connection). This module only ever
//! touches the UI side through that channel — it has no notion of HTTP or
//! WebSockets.

use crate::models::{TerminalCommandEntry, TerminalSessionInfo, TerminalStatus};
use crate::registry::ConnectionRegistry;
use crate::store::Store;
use chrono::Utc;
use dashmap::DashMap;
use fleet_protocol::{ServerMessage, TerminalMessage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

const BUFFER_CAP: usize = 1000;
const BUFFER_TRIM_TO: usize = 500;

type UiTx = mpsc::UnboundedSender<TerminalMessage>;

struct SessionState {
    info: TerminalSessionInfo,
    buffer: VecDeque<String>,
    pending_line: String,
    ui_tx: UiTx,
}

/// Tracks every interactive terminal session, keyed by `session_id`.
#[derive(Clone, Default)]
pub struct TerminalManager {
    sessions: Arc<DashMap<String, Arc<Mutex<SessionState>>>>,
}

impl TerminalManager {
    pub fn new() -> Self {
        TerminalManager::default()
    }

    /// Open a new session against `agent_id`, attaching the UI-facing
    /// channel the caller will drain to forward output back over its
    /// WebSocket. Returns the new `session_id`.
    pub fn create_session(
        &self,
        registry: &ConnectionRegistry,
        agent_id: &str,
        user_id: &str,
        rows: u16,
        cols: u16,
        working_directory: Option<String>,
        ui_tx: UiTx,
    ) -> Option<String> {
        if !registry.is_connected(agent_id) {
            return None;
        }

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let info = TerminalSessionInfo {
            session_id: session_id.clone(),
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            status: TerminalStatus::Active,
            created_at: now,
            last_activity: now,
            rows,
            cols,
            working_directory: working_directory.clone(),
        };

        self.sessions.insert(
            session_id.clone(),
            Arc::new(Mutex::new(SessionState {
                info,
                buffer: VecDeque::new(),
                pending_line: String::new(),
                ui_tx,
            })),
        );

        registry.send(
            agent_id,
            ServerMessage::TerminalStart {
                session_id: session_id.clone(),
                rows,
                cols,
                working_directory,
            },
        );

        Some(session_id)
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let entry = self.sessions.get(session_id)?;
        let mut guard = entry.lock().unwrap();
        Some(f(&mut guard))
    }

    /// Forward a keystroke/paste from the UI to the agent, and buffer it
    /// into the pending command line for audit once a newline arrives.
    pub async fn handle_ui_input(&self, registry: &ConnectionRegistry, store: &Arc<dyn Store>, session_id: &str, data: String) {
        let Some((agent_id, completed_line)) = self.with_session(session_id, |session| {
            session.info.last_activity = Utc::now();
            session.pending_line.push_str(&data);
            let mut completed = None;
            if let Some(pos) = session.pending_line.find(['\n', '\r']) {
                completed = Some(session.pending_line[..pos].to_string());
                session.pending_line = session.pending_line[pos + 1..].to_string();
            }
            (session.info.agent_id.clone(), completed)
        }) else {
            return;
        };

        registry.send(
            &agent_id,
            ServerMessage::TerminalInput {
                session_id: session_id.to_string(),
                data,
            },
        );

        if let Some(line) = completed_line.filter(|l| !l.trim().is_empty()) {
            let info = self.with_session(session_id, |s| s.info.clone());
            store
                .append_terminal_command(TerminalCommandEntry {
                    session_id: session_id.to_string(),
                    agent_id,
                    user_id: info.map(|i| i.user_id).unwrap_or_default(),
                    command: line,
                    timestamp: Utc::now(),
                })
                .await;
        }
    }

    pub fn resize(&self, registry: &ConnectionRegistry, session_id: &str, rows: u16, cols: u16) {
        let Some(agent_id) = self.with_session(session_id, |session| {
            session.info.rows = rows;
            session.info.cols = cols;
            session.info.last_activity = Utc::now();
            session.info.agent_id.clone()
        }) else {
            return;
        };
        registry.send(
            &agent_id,
            ServerMessage::TerminalResize {
                session_id: session_id.to_string(),
                rows,
                cols,
            },
        );
    }

    pub fn ping(&self, session_id: &str) {
        self.with_session(session_id, |session| {
            session.info.last_activity = Utc::now();
            let _ = session.ui_tx.send(TerminalMessage::Pong {
                session_id: session_id.to_string(),
            });
        });
    }

    /// Close a session from the UI side: notify the agent and drop local
    /// state. Idempotent.
    pub fn close(&self, registry: &ConnectionRegistry, session_id: &str) {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return;
        };
        let agent_id = entry.lock().unwrap().info.agent_id.clone();
        registry.send(
            &agent_id,
            ServerMessage::TerminalClose {
                session_id: session_id.to_string(),
            },
        );
    }

    /// Agent-side output arrives here (from the real WebSocket loop or a
    /// mock agent task) — buffered and forwarded to the UI.
    pub async fn handle_agent_output(&self, session_id: &str, data: String) {
        self.with_session(session_id, |session| {
            session.info.last_activity = Utc::now();
            push_chunk(&mut session.buffer, data.clone());
            let _ = session.ui_tx.send(TerminalMessage::Output {
                session_id: session_id.to_string(),
                data,
            });
        });
    }

    pub async fn handle_agent_error(&self, session_id: &str, data: String) {
        self.with_session(session_id, |session| {
            session.info.last_activity = Utc::now();
            push_chunk(&mut session.buffer, data.clone());
            let _ = session.ui_tx.send(TerminalMessage::Error {
                session_id: session_id.to_string(),
                data,
            });
        });
    }

    /// Agent reports its side of the session has exited.
    pub async fn handle_agent_closed(&self, session_id: &str) {
        self.with_session(session_id, |session| {
            session.info.status = TerminalStatus::Closed;
            let _ = session.ui_tx.send(TerminalMessage::Closed {
                session_id: session_id.to_string(),
            });
        });
        self.sessions.remove(session_id);
    }

    /// Buffered output for a session, oldest first — used when a UI client
    /// (re)attaches mid-session.
    pub fn replay_buffer(&self, session_id: &str) -> Vec<String> {
        self.with_session(session_id, |session| session.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_info(&self, session_id: &str) -> Option<TerminalSessionInfo> {
        self.with_session(session_id, |session| session.info.clone())
    }

    /// Close any session idle longer than `timeout`.
    pub fn sweep(&self, registry: &ConnectionRegistry, timeout: Duration) {
        let now = Utc::now();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().lock().unwrap();
                let age = (now - session.info.last_activity).to_std().unwrap_or_default();
                (age > timeout).then(|| entry.key().clone())
            })
            .collect();

        for session_id in stale {
            debug!(session_id, "closing idle terminal session");
            self.close(registry, &session_id);
        }
    }
}

fn push_chunk(buffer: &mut VecDeque<String>, chunk: String) {
    buffer.push_back(chunk);
    if buffer.len() > BUFFER_CAP {
        for _ in 0..(BUFFER_CAP - BUFFER_TRIM_TO) {
            buffer.pop_front();
        }
        warn!(cap = BUFFER_CAP, trimmed_to = BUFFER_TRIM_TO, "terminal buffer trimmed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (UiTx, mpsc::UnboundedReceiver<TerminalMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn buffer_trims_on_overflow() {
        let mut buffer = VecDeque::new();
        for i in 0..(BUFFER_CAP + 1) {
            push_chunk(&mut buffer, i.to_string());
        }
        assert_eq!(buffer.len(), BUFFER_TRIM_TO + 1);
        assert_eq!(buffer.back().unwrap(), &BUFFER_CAP.to_string());
    }

    #[tokio::test]
    async fn create_session_fails_against_unconnected_agent() {
        let manager = TerminalManager::new();
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let session = manager.create_session(&registry, "A1", "u1", 24, 80, None, tx);
        assert!(session.is_none());
    }

    #[test]
    fn create_session_succeeds_against_connected_agent() {
        let manager = TerminalManager::new();
        let registry = ConnectionRegistry::new();
        let (agent_tx, _agent_rx) = mpsc::unbounded_channel();
        let connection_id = registry.attach(agent_tx);
        registry.bind(&connection_id, "A1");

        let (ui_tx, _ui_rx) = channel();
        let session_id = manager
            .create_session(&registry, "A1", "u1", 24, 80, None, ui_tx)
            .unwrap();
        assert!(manager.session_info(&session_id).is_some());
    }
}
