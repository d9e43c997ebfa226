//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8090";

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 500;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default time a closing connection's sender gets to drain (500 ms).
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Default window in which a repeated trigger from the same source is ignored.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Default time a cancelled orchestration task gets to unwind.
pub const DEFAULT_TASK_GRACE: Duration = Duration::from_millis(200);

/// Default max message size for WebSocket (1 MB).
pub const DEFAULT_MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Connection registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,

    /// Reject registrations beyond `max_connections`.
    pub limit_enabled: bool,

    /// Outbound queue capacity per connection. The oldest message is
    /// dropped when a full queue receives a new one.
    pub queue_capacity: usize,

    /// How long `unregister` waits for the sender task before forcing the
    /// transport closed.
    pub close_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            limit_enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_limit_enabled(mut self, enabled: bool) -> Self {
        self.limit_enabled = enabled;
        self
    }

    /// Set the per-connection queue capacity (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

/// Barge-in coordinator configuration.
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    /// Repeated triggers from the same source inside this window are dropped.
    pub debounce: Duration,

    /// How long each cancelled orchestration task is awaited.
    pub task_grace: Duration,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            task_grace: DEFAULT_TASK_GRACE,
        }
    }
}

impl BargeInConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_task_grace(mut self, grace: Duration) -> Self {
        self.task_grace = grace;
        self
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Maximum WebSocket message size in bytes.
    pub max_ws_message_size: usize,

    /// Connection registry settings.
    pub registry: RegistryConfig,

    /// Barge-in settings.
    pub barge_in: BargeInConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8090)),
            max_ws_message_size: DEFAULT_MAX_WS_MESSAGE_SIZE,
            registry: RegistryConfig::default(),
            barge_in: BargeInConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the maximum WebSocket message size.
    pub fn with_max_ws_message_size(mut self, size: usize) -> Self {
        self.max_ws_message_size = size;
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_barge_in(mut self, barge_in: BargeInConfig) -> Self {
        self.barge_in = barge_in;
        self
    }
}
