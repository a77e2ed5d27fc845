//! # Request/response correlator
//!
//! Turns a fire-and-forget transport message into a synchronous reply.
//! Each `request_id` gets a single map entry whose state transition from
//! "waiting" to "resolved" is guarded by one lock, making "mark timed out"
//! and "deliver" mutually exclusive by construction.

use crate::models::CommandResponse;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

enum PendingState {
    Waiting(oneshot::Sender<CommandResponse>),
    Resolved(CommandResponse),
}

struct Entry {
    agent_id: String,
    command: String,
    state: Mutex<PendingState>,
}

/// Tracks in-flight requests and their eventual resolution.
#[derive(Clone, Default)]
pub struct Correlator {
    entries: Arc<DashMap<String, Arc<Entry>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Register a pending entry and return the one-shot receiver the caller
    /// should race against a timeout.
    pub fn begin(
        &self,
        request_id: &str,
        agent_id: &str,
        command: &str,
    ) -> oneshot::Receiver<CommandResponse> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id.to_string(),
            Arc::new(Entry {
                agent_id: agent_id.to_string(),
                command: command.to_string(),
                state: Mutex::new(PendingState::Waiting(tx)),
            }),
        );
        rx
    }

    /// Deliver a response for `request_id`. Ignored (and logged at debug) if
    /// there is no pending entry, or if the entry has already resolved —
    /// exactly one `deliver` ever wins.
    pub fn deliver(&self, request_id: &str, response: CommandResponse) {
        let Some(entry) = self.entries.get(request_id).map(|e| e.clone()) else {
            debug!(request_id, "deliver for unknown/expired request_id, dropping");
            return;
        };

        let mut state = entry.state.lock().unwrap();
        match &mut *state {
            PendingState::Waiting(_) => {
                let PendingState::Waiting(tx) =
                    std::mem::replace(&mut *state, PendingState::Resolved(response.clone()))
                else {
                    unreachable!()
                };
                // Ignore send errors: the awaiter may already have timed out
                // and dropped its receiver, but the response is still stored
                // above for late retrieval via `get`.
                let _ = tx.send(response);
            }
            PendingState::Resolved(_) => {
                debug!(request_id, "late deliver for already-resolved request_id, dropping");
            }
        }
    }

    /// Wait for `request_id` to resolve, up to `timeout`. On timeout, the
    /// entry is atomically marked `Resolved` with a timeout response so a
    /// subsequent late `deliver` is a no-op and subsequent `get` calls see
    /// the cached timeout result.
    pub async fn await_response(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<CommandResponse>,
        timeout: Duration,
    ) -> CommandResponse {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => self.mark_timeout(request_id, timeout.as_secs()),
        }
    }

    /// Mark `request_id` as timed out, unless it has already resolved (a
    /// `deliver` that raced in just ahead of the timer wins).
    fn mark_timeout(&self, request_id: &str, after_secs: u64) -> CommandResponse {
        let timeout_response = CommandResponse::timeout(after_secs);
        let Some(entry) = self.entries.get(request_id).map(|e| e.clone()) else {
            return timeout_response;
        };

        let mut state = entry.state.lock().unwrap();
        match &*state {
            PendingState::Resolved(resp) => resp.clone(),
            PendingState::Waiting(_) => {
                *state = PendingState::Resolved(timeout_response.clone());
                timeout_response
            }
        }
    }

    /// Idempotent polling accessor for async-style callers (`GET /commands/{id}`).
    pub fn get(&self, request_id: &str) -> Option<CommandResponse> {
        let entry = self.entries.get(request_id)?.clone();
        let state = entry.state.lock().unwrap();
        match &*state {
            PendingState::Resolved(resp) => Some(resp.clone()),
            PendingState::Waiting(_) => None,
        }
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    /// The `(agent_id, command)` a pending entry was created for, used by
    /// the Message Handler to enrich a `CommandResponse` into a full
    /// [`crate::models::CommandHistoryEntry`] without needing to thread the
    /// original command text through the wire response.
    pub fn pending_info(&self, request_id: &str) -> Option<(String, String)> {
        let entry = self.entries.get(request_id)?;
        Some((entry.agent_id.clone(), entry.command.clone()))
    }

    /// Drop a pending entry outright — used when a send to the agent fails
    /// outright, so the request never appears "pending" forever.
    pub fn cancel(&self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// Evict resolved entries older than `retention`. Intended to run
    /// periodically from a background sweeper; bounds the map's growth
    /// with a fixed retention window.
    pub fn sweep(&self, retention: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        self.entries.retain(|_, entry| {
            let state = entry.state.lock().unwrap();
            match &*state {
                PendingState::Waiting(_) => true,
                PendingState::Resolved(resp) => resp.timestamp > cutoff,
            }
        });
    }
}

/// Generates a collision-resistant request id: a high-resolution timestamp
/// plus a random nonce.
pub fn generate_request_id(prefix: &str) -> String {
    use rand::Rng;
    let nonce: u64 = rand::rng().random();
    format!("{prefix}_{}_{:016x}", Utc::now().timestamp_nanos_opt().unwrap_or_default(), nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_before_timeout_is_observed() {
        let correlator = Correlator::new();
        let rx = correlator.begin("r1", "A1", "Get-Date");
        correlator.deliver(
            "r1",
            CommandResponse {
                success: true,
                output: "ok".into(),
                data: None,
                error: String::new(),
                exit_code: 0,
                execution_time: 0.1,
                timestamp: Utc::now(),
            },
        );
        let response = correlator
            .await_response("r1", rx, Duration::from_secs(5))
            .await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn timeout_wins_when_no_delivery() {
        let correlator = Correlator::new();
        let rx = correlator.begin("r2", "A1", "sleep");
        let response = correlator
            .await_response("r2", rx, Duration::from_millis(20))
            .await;
        assert!(!response.success);
        assert!(response.error.contains("timed out"));
    }

    #[tokio::test]
    async fn late_deliver_after_timeout_does_not_overwrite() {
        let correlator = Correlator::new();
        let rx = correlator.begin("r3", "A1", "sleep");
        let timed_out = correlator
            .await_response("r3", rx, Duration::from_millis(10))
            .await;
        assert!(timed_out.error.contains("timed out"));

        correlator.deliver(
            "r3",
            CommandResponse {
                success: true,
                output: "late".into(),
                data: None,
                error: String::new(),
                exit_code: 0,
                execution_time: 0.1,
                timestamp: Utc::now(),
            },
        );

        let stored = correlator.get("r3").unwrap();
        assert!(!stored.success);
        assert!(stored.error.contains("timed out"));
    }

    #[test]
    fn request_ids_do_not_collide_under_concurrency() {
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(generate_request_id("ps")));
        }
    }
}
