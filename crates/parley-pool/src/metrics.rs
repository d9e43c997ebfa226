//! Allocation counters for a resource pool.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pool::Tier;

#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    dedicated_hits: AtomicU64,
    warm_allocations: AtomicU64,
    cold_allocations: AtomicU64,
    exhausted: AtomicU64,
    timeouts: AtomicU64,
    releases: AtomicU64,
    discarded: AtomicU64,
    stale_evictions: AtomicU64,
    prewarmed: AtomicU64,
}

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub dedicated_hits: u64,
    pub warm_allocations: u64,
    pub cold_allocations: u64,
    pub exhausted: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub discarded: u64,
    pub stale_evictions: u64,
    pub prewarmed: u64,
}

impl PoolMetrics {
    pub(crate) fn record_allocation(&self, tier: Tier) {
        let counter = match tier {
            Tier::Dedicated => &self.dedicated_hits,
            Tier::Warm => &self.warm_allocations,
            Tier::Cold => &self.cold_allocations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_eviction(&self) {
        self.stale_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prewarmed(&self, count: u64) {
        self.prewarmed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dedicated_hits: self.dedicated_hits.load(Ordering::Relaxed),
            warm_allocations: self.warm_allocations.load(Ordering::Relaxed),
            cold_allocations: self.cold_allocations.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            stale_evictions: self.stale_evictions.load(Ordering::Relaxed),
            prewarmed: self.prewarmed.load(Ordering::Relaxed),
        }
    }
}
