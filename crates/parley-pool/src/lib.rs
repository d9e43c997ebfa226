//! Session-aware tiered resource pool.
//!
//! Speech and model clients are expensive to construct, so Parley keeps a
//! small warm pool of them and binds one to each session on first use.
//! [`ResourcePool::acquire_for_session`] walks the dedicated → warm → cold
//! ladder under a single lock; background loops top up the warm pool and
//! reclaim resources from idle sessions.
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_pool::{PoolConfig, ResourcePool, factory_fn};
//!
//! let pool = ResourcePool::new(
//!     PoolConfig::new("tts").with_size(4).with_max_dedicated(16),
//!     factory_fn(|| async { Ok(TtsClient::connect().await?) }),
//! );
//! pool.prepare().await?;
//! let allocation = pool.acquire_for_session("ab12cd34ef56", None).await?;
//! ```

mod config;
mod error;
mod factory;
mod metrics;
mod pool;

pub use config::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_DEDICATED, DEFAULT_MAX_PREWARM_BACKOFF, DEFAULT_SIZE, PoolConfig,
};
pub use error::{BoxError, PoolError, Result};
pub use factory::{FnFactory, ResourceFactory, factory_fn};
pub use metrics::MetricsSnapshot;
pub use pool::{
    Allocation, LeaseInfo, PoolGuard, PoolSnapshot, PooledResource, ResourcePool, Tier,
};
