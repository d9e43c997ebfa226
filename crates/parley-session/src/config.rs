//! Configuration for session state and the session registry.

use std::time::Duration;

/// Default TTL applied to session blobs written to the shared store (24 hours).
pub const DEFAULT_STORE_TTL: Option<Duration> = Some(Duration::from_secs(24 * 60 * 60));

/// Default age after which a session is reclaimed by the stale sweep (24 hours).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between stale sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for session state replication and lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TTL for blobs written to the shared store. `None` keeps them forever.
    pub store_ttl: Option<Duration>,

    /// Sessions created longer ago than this are removed by the sweep.
    pub max_age: Duration,

    /// Interval for the background stale sweep.
    pub sweep_interval: Duration,

    /// When set, resumed or created sessions re-synchronize from the
    /// shared store on this interval.
    pub auto_refresh: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_ttl: DEFAULT_STORE_TTL,
            max_age: DEFAULT_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            auto_refresh: None,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TTL used when writing session blobs.
    pub fn with_store_ttl(mut self, ttl: Duration) -> Self {
        self.store_ttl = Some(ttl);
        self
    }

    /// Write session blobs without a TTL.
    pub fn without_store_ttl(mut self) -> Self {
        self.store_ttl = None;
        self
    }

    /// Set the maximum session age before the sweep reclaims it.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the stale sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable background auto-refresh with the given interval.
    pub fn with_auto_refresh(mut self, interval: Duration) -> Self {
        self.auto_refresh = Some(interval);
        self
    }
}
