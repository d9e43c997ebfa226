//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]             # bind address, frame limits
//! [connections]        # connection registry limits and queues
//! [session]            # session replication and lifetime
//! [barge_in]           # interruption timing
//! [pools.tts]          # named resource pools
//! [logging]            # log level and file output
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: Option<ServerSection>,
    pub connections: Option<ConnectionsSection>,
    pub session: Option<SessionSection>,
    pub barge_in: Option<BargeInSection>,

    /// Named resource pools (`[pools.tts]`, `[pools.stt]`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pools: BTreeMap<String, PoolSection>,

    pub logging: Option<LoggingSection>,
}

impl ParleyConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole; pools are replaced by name.
    pub fn merge(&mut self, other: ParleyConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.connections.is_some() {
            self.connections = other.connections;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.barge_in.is_some() {
            self.barge_in = other.barge_in;
        }
        for (name, pool) in other.pools {
            self.pools.insert(name, pool);
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// The `[server]` section, or its defaults.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    pub fn connections(&self) -> ConnectionsSection {
        self.connections.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    pub fn barge_in(&self) -> BargeInSection {
        self.barge_in.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        self.server().bind_address()?;

        let connections = self.connections();
        if connections.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "connections.queue_capacity",
                "must be at least 1",
            ));
        }
        if connections.limit_enabled && connections.max_connections == 0 {
            return Err(ConfigError::invalid(
                "connections.max_connections",
                "must be at least 1 when the limit is enabled",
            ));
        }

        for (name, pool) in &self.pools {
            if pool.session_aware && pool.max_dedicated == 0 {
                return Err(ConfigError::invalid(
                    format!("pools.{}.max_dedicated", name),
                    "must be at least 1 for a session-aware pool",
                ));
            }
        }
        Ok(())
    }
}

/// Zero means "disabled" for optional intervals.
fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to (`host:port`).
    pub bind: String,
    /// Largest accepted WebSocket frame in bytes.
    pub max_ws_message_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8090".to_string(),
            max_ws_message_size: 1024 * 1024,
        }
    }
}

impl ServerSection {
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::invalid("server.bind", format!("{}: {}", self.bind, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Registry Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection registry limits.
///
/// ```toml
/// [connections]
/// max_connections = 500
/// limit_enabled = true
/// queue_capacity = 256
/// close_grace_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsSection {
    pub max_connections: usize,
    pub limit_enabled: bool,
    /// Outbound messages buffered per connection before the oldest is dropped.
    pub queue_capacity: usize,
    /// How long unregister waits for a sender to drain.
    pub close_grace_ms: u64,
}

impl Default for ConnectionsSection {
    fn default() -> Self {
        Self {
            max_connections: 500,
            limit_enabled: true,
            queue_capacity: 256,
            close_grace_ms: 500,
        }
    }
}

impl ConnectionsSection {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session replication and lifetime.
///
/// ```toml
/// [session]
/// store_ttl_secs = 86400
/// sweep_interval_secs = 300
/// max_age_hours = 24
/// auto_refresh_secs = 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// TTL of session blobs in the shared store; 0 keeps them forever.
    pub store_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_age_hours: u64,
    /// Re-sync interval from the shared store; 0 disables auto-refresh.
    pub auto_refresh_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            store_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            max_age_hours: 24,
            auto_refresh_secs: 0,
        }
    }
}

impl SessionSection {
    pub fn store_ttl(&self) -> Option<Duration> {
        nonzero_secs(self.store_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 60 * 60)
    }

    pub fn auto_refresh(&self) -> Option<Duration> {
        nonzero_secs(self.auto_refresh_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Barge-in Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Interruption timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInSection {
    /// Repeat triggers from the same source inside this window are ignored.
    pub debounce_ms: u64,
    /// How long a cancelled task may take to finish before it is abandoned.
    pub task_grace_ms: u64,
}

impl Default for BargeInSection {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            task_grace_ms: 200,
        }
    }
}

impl BargeInSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn task_grace(&self) -> Duration {
        Duration::from_millis(self.task_grace_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One named resource pool.
///
/// ```toml
/// [pools.tts]
/// size = 4
/// max_dedicated = 16
/// session_aware = true
/// prewarm_interval_secs = 30
/// cleanup_interval_secs = 60
/// max_age_secs = 1800
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Warm pool target and capacity.
    pub size: usize,
    /// Ceiling on session-bound resources.
    pub max_dedicated: usize,
    pub session_aware: bool,
    /// 0 disables pre-warming.
    pub prewarm_interval_secs: u64,
    /// 0 disables stale cleanup.
    pub cleanup_interval_secs: u64,
    pub max_age_secs: u64,
    pub max_prewarm_backoff_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            size: 2,
            max_dedicated: 8,
            session_aware: true,
            prewarm_interval_secs: 0,
            cleanup_interval_secs: 0,
            max_age_secs: 30 * 60,
            max_prewarm_backoff_secs: 5 * 60,
        }
    }
}

impl PoolSection {
    pub fn prewarm_interval(&self) -> Option<Duration> {
        nonzero_secs(self.prewarm_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        nonzero_secs(self.cleanup_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn max_prewarm_backoff(&self) -> Duration {
        Duration::from_secs(self.max_prewarm_backoff_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console filter directive used when `RUST_LOG` is unset (e.g. "info").
    pub level: Option<String>,
    /// Write JSON logs to a daily-rolling file.
    pub file: bool,
    /// Directory for log files. Defaults to `logs/` under the config dir.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: None,
            file: true,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ParleyConfig::from_toml("").unwrap();
        assert_eq!(config, ParleyConfig::default());
        assert_eq!(config.connections().max_connections, 500);
        assert_eq!(config.barge_in().debounce(), Duration::from_millis(50));
        assert_eq!(
            config.server().bind_address().unwrap(),
            "127.0.0.1:8090".parse::<SocketAddr>().unwrap()
        );
        assert!(config.pools.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = ParleyConfig::from_toml(
            r#"
[server]
bind = "0.0.0.0:9000"

[connections]
max_connections = 10
limit_enabled = false
queue_capacity = 8
close_grace_ms = 100

[session]
store_ttl_secs = 0
auto_refresh_secs = 15

[barge_in]
debounce_ms = 25

[pools.tts]
size = 4
max_dedicated = 16
prewarm_interval_secs = 30

[pools.stt]
session_aware = false
"#,
        )
        .unwrap();

        assert_eq!(config.server().bind_address().unwrap().port(), 9000);
        let connections = config.connections();
        assert_eq!(connections.max_connections, 10);
        assert!(!connections.limit_enabled);
        assert_eq!(connections.close_grace(), Duration::from_millis(100));

        let session = config.session();
        assert_eq!(session.store_ttl(), None);
        assert_eq!(session.auto_refresh(), Some(Duration::from_secs(15)));
        assert_eq!(session.max_age(), Duration::from_secs(24 * 60 * 60));

        // Unset fields keep their defaults.
        assert_eq!(config.barge_in().task_grace(), Duration::from_millis(200));

        let tts = &config.pools["tts"];
        assert_eq!(tts.size, 4);
        assert_eq!(tts.prewarm_interval(), Some(Duration::from_secs(30)));
        assert_eq!(tts.cleanup_interval(), None);
        assert!(!config.pools["stt"].session_aware);
    }

    #[test]
    fn test_merge_overrides_sections_and_pools() {
        let mut base = ParleyConfig::from_toml(
            r#"
[server]
bind = "127.0.0.1:1000"

[barge_in]
debounce_ms = 10

[pools.tts]
size = 1

[pools.stt]
size = 2
"#,
        )
        .unwrap();
        let overlay = ParleyConfig::from_toml(
            r#"
[server]
bind = "127.0.0.1:2000"

[pools.tts]
size = 9
"#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.server().bind, "127.0.0.1:2000");
        assert_eq!(base.barge_in().debounce_ms, 10);
        assert_eq!(base.pools["tts"].size, 9);
        assert_eq!(base.pools["stt"].size, 2);
    }

    #[test]
    fn test_toml_roundtrip_preserves_pools() {
        let mut config = ParleyConfig::new();
        config.pools.insert(
            "tts".to_string(),
            PoolSection {
                size: 3,
                ..Default::default()
            },
        );
        config.connections = Some(ConnectionsSection::default());

        let text = config.to_toml().unwrap();
        assert!(text.contains("[pools.tts]"));
        assert_eq!(ParleyConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_bind = ParleyConfig::from_toml("[server]\nbind = \"nowhere\"").unwrap();
        assert!(matches!(
            bad_bind.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "server.bind"
        ));

        let zero_queue = ParleyConfig::from_toml("[connections]\nqueue_capacity = 0").unwrap();
        assert!(zero_queue.validate().is_err());

        let zero_limit = ParleyConfig::from_toml(
            "[connections]\nmax_connections = 0\nlimit_enabled = false",
        )
        .unwrap();
        assert!(zero_limit.validate().is_ok());

        let pool = ParleyConfig::from_toml("[pools.tts]\nmax_dedicated = 0").unwrap();
        assert!(matches!(
            pool.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "pools.tts.max_dedicated"
        ));

        assert!(ParleyConfig::new().validate().is_ok());
    }

    #[test]
    fn test_unknown_sections_are_ignored() {
        // Unknown keys are ignored so newer files still load.
        let config = ParleyConfig::from_toml("[telemetry]\nendpoint = \"x\"").unwrap();
        assert_eq!(config, ParleyConfig::default());
    }
}
