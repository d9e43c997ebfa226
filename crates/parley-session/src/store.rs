//! Shared key/value store contract used for session replication.
//!
//! Session state is replicated as opaque string blobs keyed by
//! `session:<session_id>`. The [`SharedStore`] trait keeps this crate
//! decoupled from the actual cache service; [`MemoryStore`] is the
//! in-process implementation used for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// Key prefix for session blobs in the shared store.
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Build the shared-store key for a session.
pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// Trait for shared key/value backends.
///
/// Implementations must be safe to call concurrently from many sessions.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch a string value. Returns `Ok(None)` when the key is absent or expired.
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value with an optional TTL. Returns whether the write
    /// was accepted.
    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Set a TTL on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key. Returns `false` if the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Shared handle to a store backend.
pub type SharedStoreRef = Arc<dyn SharedStore>;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory [`SharedStore`] with lazily enforced TTLs.
///
/// Besides the async trait, the store exposes blocking inherent methods
/// (`get`, `set`, ...) for callers outside the runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, StoredValue>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking read.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(stored) if stored.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(stored) => Some(stored.value.clone()),
            None => None,
        }
    }

    /// Blocking write.
    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let stored = StoredValue {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), stored);
        true
    }

    /// Blocking TTL update.
    pub fn set_expiry(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(stored) if !stored.is_expired(now) => {
                stored.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    /// Blocking delete.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Number of live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|v| !v.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        Ok(self.set(key, value, ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.set_expiry(key, ttl))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key))
    }
}
