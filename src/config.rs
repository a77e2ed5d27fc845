//! # Server configuration
//!
//! All settings are environment-supplied. Values are loaded once at startup
//! into a plain struct via the `config` crate's environment source; nothing
//! in the core re-reads the environment after `Settings::load()` returns.

use std::time::Duration;

/// Environment-driven server configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the HTTP/WebSocket listener.
    pub bind_addr: String,
    /// Backing store URL. The in-memory `Store` implementation ignores this
    /// beyond logging it; a Postgres/SQLite implementation would use it to
    /// open its pool.
    pub database_url: String,
    /// JWT secret for the auth collaborator. The core accepts and forwards
    /// this but never validates tokens itself.
    pub jwt_secret: String,
    /// Enables the mock agent subsystem.
    pub mock_agents: bool,
    /// Default command timeout in seconds, before per-call clamping.
    pub default_command_timeout: Duration,
    /// Terminal session inactivity timeout.
    pub terminal_session_timeout: Duration,
    /// Heartbeat age past which an unattached agent is considered offline.
    pub heartbeat_offline_threshold: Duration,
}

/// Command timeout is clamped into this range by the Dispatcher regardless
/// of what a caller or `Settings` requests.
pub const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// How long after delivery (or timeout) a `PendingCommand` is retained for
/// late `get_result` retrieval, before the Correlator's sweeper evicts it.
pub const PENDING_RETENTION: Duration = Duration::from_secs(300);

impl Settings {
    /// Clamp a requested timeout into `[MIN_COMMAND_TIMEOUT, MAX_COMMAND_TIMEOUT]`.
    pub fn clamp_timeout(d: Duration) -> Duration {
        d.clamp(MIN_COMMAND_TIMEOUT, MAX_COMMAND_TIMEOUT)
    }

    /// Load settings from the process environment, falling back to
    /// development-friendly defaults for anything unset.
    pub fn load() -> Self {
        let source = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:7070")
            .expect("default is a valid string")
            .set_default("database_url", "sqlite://fleet.db")
            .expect("default is a valid string")
            .set_default("jwt_secret", "dev-secret")
            .expect("default is a valid string")
            .set_default("mock_agents", false)
            .expect("default is a valid bool")
            .set_default("default_command_timeout_secs", 15i64)
            .expect("default is a valid int")
            .set_default("terminal_session_timeout_secs", 1800i64)
            .expect("default is a valid int")
            .set_default("heartbeat_offline_threshold_secs", 60i64)
            .expect("default is a valid int")
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .expect("environment source never fails to build");

        let mock_agents = source.get_bool("mock_agents").unwrap_or(false)
            || source.get_bool("enable_test_mode").unwrap_or(false);

        Settings {
            bind_addr: source.get_string("bind_addr").unwrap_or_default(),
            database_url: source.get_string("database_url").unwrap_or_default(),
            jwt_secret: source.get_string("jwt_secret").unwrap_or_default(),
            mock_agents,
            default_command_timeout: Duration::from_secs(
                source.get_int("default_command_timeout_secs").unwrap_or(15) as u64,
            ),
            terminal_session_timeout: Duration::from_secs(
                source.get_int("terminal_session_timeout_secs").unwrap_or(1800) as u64,
            ),
            heartbeat_offline_threshold: Duration::from_secs(
                source.get_int("heartbeat_offline_threshold_secs").unwrap_or(60) as u64,
            ),
        }
    }

    /// Fixed settings for unit/integration tests — no environment reads, no
    /// reliance on the process's ambient env vars.
    #[cfg(any(test, feature = "test-util"))]
    pub fn for_tests() -> Self {
        Settings {
            bind_addr: "127.0.0.1:0".to_string(),
            database_url: "memory://".to_string(),
            jwt_secret: "test-secret".to_string(),
            mock_agents: false,
            default_command_timeout: Duration::from_secs(15),
            terminal_session_timeout: Duration::from_secs(1800),
            heartbeat_offline_threshold: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_timeout_enforces_bounds() {
        assert_eq!(
            Settings::clamp_timeout(Duration::from_secs(0)),
            MIN_COMMAND_TIMEOUT
        );
        assert_eq!(
            Settings::clamp_timeout(Duration::from_secs(10_000)),
            MAX_COMMAND_TIMEOUT
        );
        assert_eq!(
            Settings::clamp_timeout(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }
}
