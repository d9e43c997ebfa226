//! Application state shared across handlers.
//!
//! `AppState` is the composition root: every registry, the shared store and
//! the barge-in coordinator are constructed here once and handed to the
//! routes. Nothing is global.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_pool::{PoolConfig, PoolError, PoolSnapshot, ResourceFactory, ResourcePool};
use parley_session::{SessionConfig, SessionRegistry, SharedStoreRef};
use tracing::{debug, info, warn};

use crate::barge_in::BargeInCoordinator;
use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;

/// Type-erased view of a [`ResourcePool`] for reporting and teardown.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn snapshot(&self) -> PoolSnapshot;

    /// Return the session's dedicated resource to the pool.
    async fn release_session(&self, session_id: &str) -> bool;

    async fn shutdown(&self);
}

#[async_trait]
impl<R: Send + Sync + 'static> ManagedPool for ResourcePool<R> {
    fn name(&self) -> &str {
        ResourcePool::name(self)
    }

    fn snapshot(&self) -> PoolSnapshot {
        ResourcePool::snapshot(self)
    }

    async fn release_session(&self, session_id: &str) -> bool {
        self.release_session_resource(session_id).await
    }

    async fn shutdown(&self) {
        ResourcePool::shutdown(self).await
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Live connections.
    pub connections: ConnectionRegistry,

    /// Live sessions.
    pub sessions: SessionRegistry,

    /// Store sessions are persisted to and resumed from.
    pub store: SharedStoreRef,

    /// Barge-in coordinator.
    pub barge_in: BargeInCoordinator,

    pools: Arc<RwLock<Vec<Arc<dyn ManagedPool>>>>,
    pool_configs: Arc<RwLock<BTreeMap<String, PoolConfig>>>,
    started_at: Instant,
}

impl AppState {
    /// Build every component from its configuration.
    pub fn new(config: ServerConfig, session_config: SessionConfig, store: SharedStoreRef) -> Self {
        let connections = ConnectionRegistry::new(config.registry.clone());
        let sessions = SessionRegistry::new(session_config);
        let barge_in = BargeInCoordinator::with_sessions(
            connections.clone(),
            sessions.clone(),
            config.barge_in.clone(),
        );
        Self {
            config: Arc::new(config),
            connections,
            sessions,
            store,
            barge_in,
            pools: Arc::new(RwLock::new(Vec::new())),
            pool_configs: Arc::new(RwLock::new(BTreeMap::new())),
            started_at: Instant::now(),
        }
    }

    /// Register a resource pool for stats reporting, session release and
    /// shutdown.
    pub fn with_pool(self, pool: impl ManagedPool) -> Self {
        self.add_pool(Arc::new(pool));
        self
    }

    pub fn add_pool(&self, pool: Arc<dyn ManagedPool>) {
        debug!(pool = %pool.name(), "Resource pool registered");
        self.pools.write().push(pool);
    }

    /// Keep pool settings by name until a factory is attached for them.
    pub fn with_pool_configs(self, configs: impl IntoIterator<Item = PoolConfig>) -> Self {
        {
            let mut known = self.pool_configs.write();
            for config in configs {
                known.insert(config.name.clone(), config);
            }
        }
        self
    }

    pub fn pool_config(&self, name: &str) -> Option<PoolConfig> {
        self.pool_configs.read().get(name).cloned()
    }

    /// Configured pool names that have no running pool yet.
    pub fn unattached_pools(&self) -> Vec<String> {
        let running: Vec<String> = self
            .pools
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        self.pool_configs
            .read()
            .keys()
            .filter(|name| !running.contains(name))
            .cloned()
            .collect()
    }

    /// Build the pool configured under `name` around `factory`, prepare it
    /// and register it.
    ///
    /// A name with no configuration gets [`PoolConfig`] defaults.
    pub async fn attach_pool<R>(
        &self,
        name: &str,
        factory: impl ResourceFactory<R>,
    ) -> Result<ResourcePool<R>, PoolError>
    where
        R: Send + Sync + 'static,
    {
        let config = self.pool_config(name).unwrap_or_else(|| {
            debug!(pool = %name, "No configuration for pool, using defaults");
            PoolConfig::new(name)
        });
        let pool = ResourcePool::new(config, factory);
        pool.prepare().await?;
        self.add_pool(Arc::new(pool.clone()));
        Ok(pool)
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.read().iter().map(|p| p.snapshot()).collect()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Start background work owned by the state's components.
    pub fn start(&self) {
        self.sessions.start_sweeper();
        self.barge_in.start();
    }

    /// Persist and drop a session no connection uses any more, returning its
    /// pool resources.
    ///
    /// The write lands before the session leaves the registry, so a reconnect
    /// either finds the live session or resumes the persisted one.
    pub async fn release_session(&self, session_id: &str) {
        if !self.connections.session_members(session_id).is_empty() {
            return;
        }

        if let Some(session) = self.sessions.get_session(session_id)
            && let Err(e) = session.persist(self.store.as_ref()).await
        {
            warn!(session_id = %session_id, error = %e, "Failed to persist released session");
        }

        let connections = &self.connections;
        let removed = self
            .sessions
            .remove_session_unless(session_id, || {
                !connections.session_members(session_id).is_empty()
            })
            .await;
        if removed.is_none() && self.sessions.contains(session_id) {
            debug!(session_id = %session_id, "Session re-joined during release, kept");
            return;
        }

        let pools: Vec<Arc<dyn ManagedPool>> = self.pools.read().clone();
        for pool in pools {
            if pool.release_session(session_id).await {
                debug!(pool = %pool.name(), session_id = %session_id, "Released session resource");
            }
        }
    }

    /// Stop every component: connections first, then barge-in, pools and
    /// sessions.
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        self.barge_in.shutdown().await;

        let pools: Vec<Arc<dyn ManagedPool>> = self.pools.read().clone();
        for pool in pools {
            pool.shutdown().await;
        }

        let remaining = self.sessions.session_ids();
        for session_id in &remaining {
            if let Some(session) = self.sessions.get_session(session_id)
                && let Err(e) = session.persist(self.store.as_ref()).await
            {
                warn!(session_id = %session_id, error = %e, "Failed to persist session on shutdown");
            }
        }
        self.sessions.shutdown().await;

        info!(sessions = remaining.len(), "Application state shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::Registration;
    use crate::connections::testing::MockTransport;
    use parley_pool::{BoxError, PoolConfig, factory_fn};
    use parley_session::{MemoryStore, SharedStore, session_key};

    fn state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(ServerConfig::default(), SessionConfig::default(), store.clone());
        (state, store)
    }

    #[tokio::test]
    async fn test_release_session_waits_for_last_connection() {
        let (state, store) = state();
        let (session, _) = state.sessions.resume_or_create(Some("s1"), &state.store).await;
        session.set("slot", 1);

        let a = state
            .connections
            .register(MockTransport::new(), Registration::default().with_session("s1"))
            .await
            .unwrap();
        let b = state
            .connections
            .register(MockTransport::new(), Registration::default().with_session("s1"))
            .await
            .unwrap();

        state.connections.unregister(a).await;
        state.release_session("s1").await;
        assert!(state.sessions.contains("s1"));

        state.connections.unregister(b).await;
        state.release_session("s1").await;
        assert!(!state.sessions.contains("s1"));

        assert!(store.get_string(&session_key("s1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconnect_right_after_release_resumes_state() {
        let (state, _store) = state();
        let id = state
            .connections
            .register(MockTransport::new(), Registration::default().with_session("s1"))
            .await
            .unwrap();
        let (session, _) = state.sessions.resume_or_create(Some("s1"), &state.store).await;
        session.set("slot", "booked");
        session.append_history("triage", parley_session::Role::User, "hello");

        state.connections.unregister(id).await;
        state.release_session("s1").await;

        let (resumed, origin) = state.sessions.resume_or_create(Some("s1"), &state.store).await;
        assert_eq!(origin, parley_session::SessionOrigin::Resumed);
        assert_eq!(resumed.get("slot"), Some(serde_json::json!("booked")));
        assert_eq!(resumed.get_history("triage").len(), 1);
    }

    #[tokio::test]
    async fn test_release_keeps_session_when_member_present() {
        let (state, _store) = state();
        let (session, _) = state.sessions.resume_or_create(Some("s1"), &state.store).await;
        session.set("slot", 1);
        state
            .connections
            .register(MockTransport::new(), Registration::default().with_session("s1"))
            .await
            .unwrap();

        state.release_session("s1").await;

        let (again, origin) = state.sessions.resume_or_create(Some("s1"), &state.store).await;
        assert_eq!(origin, parley_session::SessionOrigin::Active);
        assert_eq!(again.get("slot"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_attach_pool_uses_named_config() {
        let (state, _) = state();
        let state = state.with_pool_configs([
            PoolConfig::new("tts").with_size(2).with_max_dedicated(3),
            PoolConfig::new("stt").with_size(1),
        ]);
        assert_eq!(state.unattached_pools(), vec!["stt", "tts"]);

        let pool = state
            .attach_pool("tts", factory_fn(|| async { Ok::<_, BoxError>(1u8) }))
            .await
            .unwrap();
        assert!(pool.is_initialized());
        assert_eq!(state.unattached_pools(), vec!["stt"]);

        let snapshots = state.pool_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].warm_available, 2);
        assert_eq!(snapshots[0].dedicated_capacity, 3);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_pools_are_reported_and_released() {
        let (state, _) = state();
        let pool = ResourcePool::new(
            PoolConfig::new("tts").with_size(1),
            factory_fn(|| async { Ok::<_, BoxError>(7u32) }),
        );
        pool.prepare().await.unwrap();
        let state = state.with_pool(pool.clone());

        pool.acquire_for_session("s1", None).await.unwrap();
        assert_eq!(state.pool_snapshots()[0].dedicated_active, 1);

        state.release_session("s1").await;
        assert_eq!(state.pool_snapshots()[0].dedicated_active, 0);

        state.shutdown().await;
        assert!(!pool.is_initialized());
    }
}
