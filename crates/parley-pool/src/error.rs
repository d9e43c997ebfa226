//! Error types for resource pool operations.

use std::time::Duration;

/// Boxed error returned by resource factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for resource pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The dedicated ceiling is reached and no warm resource is available.
    /// Retry after backoff.
    #[error(
        "Pool '{pool}' exhausted: {active}/{max} dedicated resources in use and none warm"
    )]
    Exhausted {
        pool: String,
        active: usize,
        max: usize,
    },

    /// A blocking acquire did not complete within its timeout.
    #[error("Timed out after {timeout:?} acquiring from pool '{pool}'")]
    AcquireTimeout { pool: String, timeout: Duration },

    /// The resource factory failed.
    #[error("Factory for pool '{pool}' failed: {source}")]
    Factory {
        pool: String,
        #[source]
        source: BoxError,
    },
}

impl PoolError {
    /// Whether the caller should retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::AcquireTimeout { .. })
    }
}

/// Result type for resource pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
