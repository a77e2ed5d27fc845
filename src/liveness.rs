//! # Liveness tracker
//!
//! Agent liveness is the conjunction of two independent signals: transport
//! attachment and heartbeat recency. `classify` is a pure function — no
//! I/O, no locking — so it is trivially unit-testable and cheap to call
//! from both `/agents/{id}/status` and the hostname-deduped listing
//! endpoint.

use crate::models::Liveness;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const WARNING_THRESHOLD: Duration = Duration::from_secs(30);
pub const OFFLINE_THRESHOLD: Duration = Duration::from_secs(60);

/// Classify an agent's liveness.
///
/// - `online` if attached OR heartbeat age < 30s.
/// - `warning` if 30s <= heartbeat age < 60s.
/// - `offline` if heartbeat age >= 60s AND not attached.
/// - `unknown` if `last_seen` is absent.
pub fn classify(attached: bool, last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Liveness {
    let Some(last_seen) = last_seen else {
        return Liveness::Unknown;
    };

    let age = (now - last_seen)
        .to_std()
        .unwrap_or(Duration::from_secs(0));

    if attached || age < WARNING_THRESHOLD {
        Liveness::Online
    } else if age < OFFLINE_THRESHOLD {
        Liveness::Warning
    } else {
        Liveness::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn attached_is_always_online() {
        let now = Utc::now();
        let stale = now - ChronoDuration::seconds(500);
        assert_eq!(classify(true, Some(stale), now), Liveness::Online);
    }

    #[test]
    fn fresh_heartbeat_is_online_even_unattached() {
        let now = Utc::now();
        let recent = now - ChronoDuration::seconds(10);
        assert_eq!(classify(false, Some(recent), now), Liveness::Online);
    }

    #[test]
    fn middling_heartbeat_is_warning() {
        let now = Utc::now();
        let middling = now - ChronoDuration::seconds(45);
        assert_eq!(classify(false, Some(middling), now), Liveness::Warning);
    }

    #[test]
    fn stale_heartbeat_unattached_is_offline() {
        let now = Utc::now();
        let stale = now - ChronoDuration::seconds(90);
        assert_eq!(classify(false, Some(stale), now), Liveness::Offline);
    }

    #[test]
    fn missing_last_seen_is_unknown() {
        assert_eq!(classify(false, None, Utc::now()), Liveness::Unknown);
    }
}
