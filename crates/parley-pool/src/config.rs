//! Configuration for a resource pool.

use std::time::Duration;

/// Default number of warm resources.
pub const DEFAULT_SIZE: usize = 2;

/// Default ceiling on resources bound to sessions.
pub const DEFAULT_MAX_DEDICATED: usize = 8;

/// Default idle age after which a dedicated resource is reclaimed (30 minutes).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Default cap on the pre-warm loop's failure backoff.
pub const DEFAULT_MAX_PREWARM_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Configuration for a [`ResourcePool`](crate::ResourcePool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool name used in logs, errors and resource ids.
    pub name: String,

    /// Target and capacity of the warm pool.
    pub size: usize,

    /// Hard ceiling on dedicated (session-bound) resources.
    pub max_dedicated: usize,

    /// Bind resources to sessions (dedicated/warm/cold ladder).
    pub session_aware: bool,

    /// Interval for replenishing the warm pool. `None` disables pre-warming.
    pub prewarm_interval: Option<Duration>,

    /// Interval for reclaiming idle dedicated resources. `None` disables cleanup.
    pub cleanup_interval: Option<Duration>,

    /// Dedicated resources unused for longer than this are reclaimed.
    pub max_age: Duration,

    /// Upper bound for the pre-warm loop's exponential backoff.
    pub max_prewarm_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            size: DEFAULT_SIZE,
            max_dedicated: DEFAULT_MAX_DEDICATED,
            session_aware: true,
            prewarm_interval: None,
            cleanup_interval: None,
            max_age: DEFAULT_MAX_AGE,
            max_prewarm_backoff: DEFAULT_MAX_PREWARM_BACKOFF,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_max_dedicated(mut self, max: usize) -> Self {
        self.max_dedicated = max;
        self
    }

    pub fn with_session_awareness(mut self, enabled: bool) -> Self {
        self.session_aware = enabled;
        self
    }

    pub fn with_prewarm_interval(mut self, interval: Duration) -> Self {
        self.prewarm_interval = Some(interval);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_prewarm_backoff(mut self, max: Duration) -> Self {
        self.max_prewarm_backoff = max;
        self
    }
}
