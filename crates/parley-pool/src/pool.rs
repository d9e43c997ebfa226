//! Session-aware tiered resource pool.
//!
//! Resources are handed out through one of three tiers:
//!
//! - **dedicated**: the session already holds a resource; it is returned as-is
//! - **warm**: a pre-created, unbound resource is popped and bound to the session
//! - **cold**: a new resource is created on demand, bounded by `max_dedicated`
//!
//! The whole ladder runs under a single allocation lock so two callers can
//! never both claim the last cold slot, and a session never ends up with two
//! resources. A resource is either in the warm queue or held by exactly one
//! lease.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::factory::ResourceFactory;
use crate::metrics::{MetricsSnapshot, PoolMetrics};

/// Allocation tier a resource was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Dedicated,
    Warm,
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Dedicated => "dedicated",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        };
        f.write_str(name)
    }
}

/// A pool resource with a stable id.
pub struct PooledResource<R> {
    id: Arc<str>,
    resource: Arc<R>,
}

impl<R> PooledResource<R> {
    /// Identifier assigned by the pool (`<pool>-<n>`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the underlying resource.
    pub fn shared(&self) -> Arc<R> {
        Arc::clone(&self.resource)
    }

    /// Whether both handles point at the same instance.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }
}

impl<R> Clone for PooledResource<R> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<R> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: fmt::Debug> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Result of [`ResourcePool::acquire_for_session`].
#[derive(Debug, Clone)]
pub struct Allocation<R> {
    pub resource: PooledResource<R>,
    pub tier: Tier,
}

/// Public view of a dedicated lease.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseInfo {
    pub session_id: String,
    pub resource_id: String,
    pub tier: Tier,
    pub age_ms: u64,
    pub idle_ms: u64,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub initialized: bool,
    pub session_aware: bool,
    pub warm_available: usize,
    pub warm_capacity: usize,
    pub dedicated_active: usize,
    pub dedicated_capacity: usize,
    pub metrics: MetricsSnapshot,
}

struct Lease<R> {
    resource: PooledResource<R>,
    session_id: String,
    tier: Tier,
    allocated_at: Instant,
    last_used_at: Instant,
}

struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner<R: Send + Sync + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory<R>>,
    warm: Mutex<VecDeque<PooledResource<R>>>,
    available: Notify,
    /// Allocation lock: held across the whole dedicated/warm/cold ladder.
    dedicated: AsyncMutex<HashMap<String, Lease<R>>>,
    dedicated_active: AtomicUsize,
    initialized: AtomicBool,
    next_id: AtomicU64,
    metrics: PoolMetrics,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl<R: Send + Sync + 'static> PoolInner<R> {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn create(&self) -> Result<PooledResource<R>> {
        let resource = self
            .factory
            .create()
            .await
            .map_err(|source| PoolError::Factory {
                pool: self.config.name.clone(),
                source,
            })?;
        let serial = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(PooledResource {
            id: Arc::from(format!("{}-{}", self.config.name, serial)),
            resource: Arc::new(resource),
        })
    }

    fn warm_len(&self) -> usize {
        self.warm.lock().len()
    }

    fn pop_warm(&self) -> Option<PooledResource<R>> {
        self.warm.lock().pop_front()
    }

    fn push_warm(&self, resource: PooledResource<R>) -> bool {
        {
            let mut warm = self.warm.lock();
            if warm.len() >= self.config.size {
                return false;
            }
            warm.push_back(resource);
        }
        self.available.notify_one();
        true
    }

    async fn wait_warm(&self) -> PooledResource<R> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(resource) = self.pop_warm() {
                return resource;
            }
            notified.await;
        }
    }

    fn return_or_discard(&self, resource: PooledResource<R>, stage: &'static str) -> bool {
        let id = Arc::clone(&resource.id);
        if self.push_warm(resource) {
            trace!(pool = %self.name(), resource_id = %id, stage, "Resource returned to warm pool");
            true
        } else {
            self.metrics.record_discard();
            debug!(pool = %self.name(), resource_id = %id, stage, "Warm pool full, discarding resource");
            false
        }
    }

    async fn recycle_into_warm(&self, resource: PooledResource<R>, stage: &'static str) {
        match self.factory.recycle(&*resource).await {
            Ok(()) => {
                self.return_or_discard(resource, stage);
            }
            Err(e) => {
                self.metrics.record_discard();
                warn!(
                    pool = %self.name(),
                    resource_id = %resource.id(),
                    stage,
                    error = %e,
                    "Recycle failed, discarding resource"
                );
            }
        }
    }

    async fn allocate(&self, session_id: &str) -> Result<Allocation<R>> {
        let mut leases = self.dedicated.lock().await;

        if let Some(lease) = leases.get_mut(session_id) {
            lease.last_used_at = Instant::now();
            self.metrics.record_allocation(Tier::Dedicated);
            trace!(pool = %self.name(), session_id = %session_id, "Reusing dedicated resource");
            return Ok(Allocation {
                resource: lease.resource.clone(),
                tier: Tier::Dedicated,
            });
        }

        let (resource, tier) = if let Some(resource) = self.pop_warm() {
            (resource, Tier::Warm)
        } else if leases.len() < self.config.max_dedicated {
            (self.create().await?, Tier::Cold)
        } else {
            self.metrics.record_exhausted();
            warn!(
                pool = %self.name(),
                session_id = %session_id,
                active = leases.len(),
                max = self.config.max_dedicated,
                "Resource pool exhausted"
            );
            return Err(PoolError::Exhausted {
                pool: self.config.name.clone(),
                active: leases.len(),
                max: self.config.max_dedicated,
            });
        };

        let now = Instant::now();
        leases.insert(
            session_id.to_string(),
            Lease {
                resource: resource.clone(),
                session_id: session_id.to_string(),
                tier,
                allocated_at: now,
                last_used_at: now,
            },
        );
        self.dedicated_active.store(leases.len(), Ordering::Relaxed);
        self.metrics.record_allocation(tier);

        debug!(
            pool = %self.name(),
            session_id = %session_id,
            resource_id = %resource.id(),
            tier = %tier,
            "Resource bound to session"
        );

        Ok(Allocation { resource, tier })
    }

    async fn replenish(&self) -> Result<usize> {
        let mut created = 0;
        while self.warm_len() < self.config.size {
            let resource = self.create().await?;
            if !self.push_warm(resource) {
                self.metrics.record_discard();
                break;
            }
            self.metrics.record_prewarmed(1);
            created += 1;
        }
        Ok(created)
    }

    async fn evict_stale(&self) -> usize {
        let max_age = self.config.max_age;
        let stale: Vec<Lease<R>> = {
            let mut leases = self.dedicated.lock().await;
            let ids: Vec<String> = leases
                .iter()
                .filter(|(_, lease)| lease.last_used_at.elapsed() > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            let stale = ids.iter().filter_map(|id| leases.remove(id)).collect();
            self.dedicated_active.store(leases.len(), Ordering::Relaxed);
            stale
        };

        let count = stale.len();
        for lease in stale {
            self.metrics.record_stale_eviction();
            debug!(
                pool = %self.name(),
                session_id = %lease.session_id,
                resource_id = %lease.resource.id(),
                idle_ms = lease.last_used_at.elapsed().as_millis() as u64,
                "Reclaiming idle dedicated resource"
            );
            self.recycle_into_warm(lease.resource, "cleanup").await;
        }
        count
    }
}

/// Async factory-backed pool with optional session-aware tiered allocation.
///
/// Cloning is cheap; clones share the same pool.
pub struct ResourcePool<R: Send + Sync + 'static> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Send + Sync + 'static> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Send + Sync + 'static> ResourcePool<R> {
    /// Create a pool. Nothing is constructed until [`prepare`](Self::prepare).
    pub fn new(config: PoolConfig, factory: impl ResourceFactory<R>) -> Self {
        Self::with_factory(config, Arc::new(factory))
    }

    /// Create a pool around a shared factory.
    pub fn with_factory(config: PoolConfig, factory: Arc<dyn ResourceFactory<R>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                warm: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                dedicated: AsyncMutex::new(HashMap::new()),
                dedicated_active: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                metrics: PoolMetrics::default(),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Fill the warm pool and start the configured background loops.
    ///
    /// Factory failures here abort startup. Calling again after success is
    /// a no-op.
    pub async fn prepare(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let missing = self.inner.config.size.saturating_sub(self.inner.warm_len());
        let created =
            futures::future::try_join_all((0..missing).map(|_| self.inner.create())).await?;
        for resource in created {
            self.inner.return_or_discard(resource, "prepare");
        }

        self.inner.initialized.store(true, Ordering::Release);
        self.start_background_tasks();

        info!(
            pool = %self.name(),
            warm = self.inner.warm_len(),
            max_dedicated = self.inner.config.max_dedicated,
            session_aware = self.inner.config.session_aware,
            "Resource pool prepared"
        );
        Ok(())
    }

    fn start_background_tasks(&self) {
        let config = &self.inner.config;
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(interval) = config.prewarm_interval.filter(|i| !i.is_zero()) {
            handles.push(tokio::spawn(run_prewarm(
                Arc::downgrade(&self.inner),
                interval,
                config.max_prewarm_backoff.max(interval),
                cancel.clone(),
            )));
        }
        if let Some(interval) = config.cleanup_interval.filter(|i| !i.is_zero()) {
            handles.push(tokio::spawn(run_cleanup(
                Arc::downgrade(&self.inner),
                interval,
                cancel.clone(),
            )));
        }
        if handles.is_empty() {
            return;
        }

        let previous = self
            .inner
            .tasks
            .lock()
            .replace(BackgroundTasks { cancel, handles });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Take a warm resource, waiting up to `timeout` for one to be released.
    ///
    /// The caller must hand it back with [`release`](Self::release); prefer
    /// [`acquire_guard`](Self::acquire_guard).
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<PooledResource<R>> {
        let resource = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inner.wait_warm())
                .await
                .map_err(|_| {
                    self.inner.metrics.record_timeout();
                    PoolError::AcquireTimeout {
                        pool: self.inner.config.name.clone(),
                        timeout,
                    }
                })?,
            None => self.inner.wait_warm().await,
        };
        self.inner.metrics.record_allocation(Tier::Warm);
        Ok(resource)
    }

    /// Like [`acquire`](Self::acquire), but the resource returns to the pool
    /// when the guard is dropped.
    pub async fn acquire_guard(&self, timeout: Option<Duration>) -> Result<PoolGuard<R>> {
        let resource = self.acquire(timeout).await?;
        Ok(PoolGuard {
            pool: self.clone(),
            resource,
        })
    }

    /// Return a resource taken with [`acquire`](Self::acquire).
    ///
    /// Returns `false` if the warm pool was full and the resource was dropped.
    pub fn release(&self, resource: PooledResource<R>) -> bool {
        self.inner.metrics.record_release();
        self.inner.return_or_discard(resource, "release")
    }

    /// Get the session's resource through the dedicated → warm → cold ladder.
    ///
    /// Fails with [`PoolError::Exhausted`] when no warm resource is left and
    /// the dedicated ceiling is reached, and with [`PoolError::AcquireTimeout`]
    /// if `timeout` elapses first. Without session awareness this behaves like
    /// [`acquire`](Self::acquire) and nothing is bound to the session.
    pub async fn acquire_for_session(
        &self,
        session_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Allocation<R>> {
        if !self.inner.config.session_aware {
            let resource = self.acquire(timeout).await?;
            return Ok(Allocation {
                resource,
                tier: Tier::Warm,
            });
        }

        let ladder = self.inner.allocate(session_id);
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, ladder).await {
                Ok(result) => result,
                Err(_) => {
                    self.inner.metrics.record_timeout();
                    Err(PoolError::AcquireTimeout {
                        pool: self.inner.config.name.clone(),
                        timeout,
                    })
                }
            },
            None => ladder.await,
        }
    }

    /// Unbind the session's resource and try to return it to the warm pool.
    ///
    /// Returns `false` if the session held no resource.
    pub async fn release_session_resource(&self, session_id: &str) -> bool {
        let lease = {
            let mut leases = self.inner.dedicated.lock().await;
            let lease = leases.remove(session_id);
            self.inner
                .dedicated_active
                .store(leases.len(), Ordering::Relaxed);
            lease
        };

        match lease {
            Some(lease) => {
                self.inner.metrics.record_release();
                debug!(
                    pool = %self.name(),
                    session_id = %session_id,
                    resource_id = %lease.resource.id(),
                    held_ms = lease.allocated_at.elapsed().as_millis() as u64,
                    "Releasing session resource"
                );
                self.inner.recycle_into_warm(lease.resource, "release").await;
                true
            }
            None => false,
        }
    }

    /// Mark the session's resource as used now. Returns `false` if none is bound.
    pub async fn touch_session(&self, session_id: &str) -> bool {
        let mut leases = self.inner.dedicated.lock().await;
        match leases.get_mut(session_id) {
            Some(lease) => {
                lease.last_used_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Current dedicated leases.
    pub async fn leases(&self) -> Vec<LeaseInfo> {
        let leases = self.inner.dedicated.lock().await;
        leases
            .values()
            .map(|lease| LeaseInfo {
                session_id: lease.session_id.clone(),
                resource_id: lease.resource.id().to_string(),
                tier: lease.tier,
                age_ms: lease.allocated_at.elapsed().as_millis() as u64,
                idle_ms: lease.last_used_at.elapsed().as_millis() as u64,
            })
            .collect()
    }

    /// Run one cleanup pass now. Returns how many leases were reclaimed.
    pub async fn cleanup_stale(&self) -> usize {
        self.inner.evict_stale().await
    }

    /// Top the warm pool up to its target size now.
    pub async fn replenish(&self) -> Result<usize> {
        self.inner.replenish().await
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            name: self.inner.config.name.clone(),
            initialized: self.is_initialized(),
            session_aware: self.inner.config.session_aware,
            warm_available: self.inner.warm_len(),
            warm_capacity: self.inner.config.size,
            dedicated_active: self.inner.dedicated_active.load(Ordering::Relaxed),
            dedicated_capacity: self.inner.config.max_dedicated,
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// Stop background loops, wait for them, and drop every resource.
    pub async fn shutdown(&self) {
        let tasks = self.inner.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            for handle in tasks.handles {
                if let Err(e) = handle.await
                    && !e.is_cancelled()
                {
                    warn!(pool = %self.name(), error = %e, "Pool background task ended abnormally");
                }
            }
        }

        self.inner.warm.lock().clear();
        {
            let mut leases = self.inner.dedicated.lock().await;
            leases.clear();
            self.inner.dedicated_active.store(0, Ordering::Relaxed);
        }
        self.inner.initialized.store(false, Ordering::Release);
        info!(pool = %self.name(), "Resource pool shut down");
    }
}

/// Scoped lease from [`ResourcePool::acquire_guard`].
///
/// The resource goes back to the warm pool on drop, on every exit path.
pub struct PoolGuard<R: Send + Sync + 'static> {
    pool: ResourcePool<R>,
    resource: PooledResource<R>,
}

impl<R: Send + Sync + 'static> PoolGuard<R> {
    pub fn resource(&self) -> &PooledResource<R> {
        &self.resource
    }
}

impl<R: Send + Sync + 'static> Deref for PoolGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Send + Sync + 'static> Drop for PoolGuard<R> {
    fn drop(&mut self) {
        self.pool.release(self.resource.clone());
    }
}

async fn run_prewarm<R: Send + Sync + 'static>(
    pool: Weak<PoolInner<R>>,
    interval: Duration,
    max_backoff: Duration,
    cancel: CancellationToken,
) {
    let mut delay = interval;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        match inner.replenish().await {
            Ok(created) => {
                if created > 0 {
                    debug!(pool = %inner.name(), created, "Pre-warmed resources");
                }
                delay = interval;
            }
            Err(e) => {
                delay = (delay * 2).min(max_backoff);
                warn!(
                    pool = %inner.name(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Pre-warm failed, backing off"
                );
            }
        }
    }
}

async fn run_cleanup<R: Send + Sync + 'static>(
    pool: Weak<PoolInner<R>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let evicted = inner.evict_stale().await;
        if evicted > 0 {
            info!(pool = %inner.name(), evicted, "Reclaimed idle dedicated resources");
        }
    }
}
