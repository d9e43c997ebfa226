//! Directory of live sessions.
//!
//! The registry maps session ids to [`SessionState`] handles. Its map is
//! guarded by its own lock, independent of any session's internal state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::state::{SessionState, generate_session_id};
use crate::store::{SharedStoreRef, session_key};

type SessionMap = Arc<RwLock<HashMap<String, SessionState>>>;

/// How [`SessionRegistry::resume_or_create`] obtained its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Already registered in this process.
    Active,
    /// Loaded from the shared store.
    Resumed,
    /// Started fresh.
    Created,
}

struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Thread-safe session directory.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: SessionMap,
    config: SessionConfig,
    sweeper: Arc<Mutex<Option<Sweeper>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a session, returning any session it replaced.
    pub fn add_session(&self, state: SessionState) -> Option<SessionState> {
        let id = state.id().to_string();
        let previous = self.sessions.write().insert(id.clone(), state);
        debug!(session_id = %id, replaced = previous.is_some(), "Session registered");
        previous
    }

    /// Remove a session and stop its auto-refresh loop.
    pub async fn remove_session(&self, session_id: &str) -> Option<SessionState> {
        let removed = self.sessions.write().remove(session_id);
        if let Some(ref state) = removed {
            state.disable_auto_refresh().await;
            debug!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// Remove a session only if `keep` returns false while the map is locked.
    ///
    /// `keep` runs under the registry's write lock, so no `resume_or_create`
    /// can hand out the session between the check and the removal.
    pub async fn remove_session_unless(
        &self,
        session_id: &str,
        keep: impl FnOnce() -> bool,
    ) -> Option<SessionState> {
        let removed = {
            let mut sessions = self.sessions.write();
            if !sessions.contains_key(session_id) || keep() {
                return None;
            }
            sessions.remove(session_id)
        };
        if let Some(ref state) = removed {
            state.disable_auto_refresh().await;
            debug!(session_id = %session_id, "Session removed");
        }
        removed
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Remove every session created more than `max_age` ago.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        sweep(&self.sessions, max_age).await
    }

    /// Return the registered session, else resume it from the store, else
    /// create it.
    ///
    /// A malformed or unreadable stored blob is treated as "no prior session
    /// data". Resumed and created sessions get auto-refresh when configured.
    pub async fn resume_or_create(
        &self,
        session_id: Option<&str>,
        store: &SharedStoreRef,
    ) -> (SessionState, SessionOrigin) {
        let id = session_id.map_or_else(generate_session_id, str::to_string);

        if let Some(existing) = self.get_session(&id) {
            return (existing, SessionOrigin::Active);
        }

        let (loaded, origin) = match store.get_string(&session_key(&id)).await {
            Ok(Some(blob)) => match SessionState::from_blob(&id, &blob) {
                Ok(state) => (state, SessionOrigin::Resumed),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Stored session is malformed, starting fresh");
                    (SessionState::new(&id), SessionOrigin::Created)
                }
            },
            Ok(None) => (SessionState::new(&id), SessionOrigin::Created),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Shared store lookup failed, starting fresh");
                (SessionState::new(&id), SessionOrigin::Created)
            }
        };
        let loaded = loaded.with_store_ttl(self.config.store_ttl);

        // Another task may have registered the same id while we were loading.
        let (state, origin) = {
            let mut sessions = self.sessions.write();
            match sessions.get(&id) {
                Some(existing) => (existing.clone(), SessionOrigin::Active),
                None => {
                    sessions.insert(id.clone(), loaded.clone());
                    (loaded, origin)
                }
            }
        };

        if origin != SessionOrigin::Active
            && let Some(interval) = self.config.auto_refresh
        {
            state.enable_auto_refresh(Arc::clone(store), interval).await;
        }

        debug!(session_id = %id, ?origin, "Session ready");
        (state, origin)
    }

    /// Start the background stale sweep using the configured interval and age.
    pub fn start_sweeper(&self) {
        let interval = self.config.sweep_interval;
        let max_age = self.config.max_age;
        if interval.is_zero() {
            warn!("Session sweep interval is zero, sweeper not started");
            return;
        }

        let cancel = CancellationToken::new();
        let sessions = Arc::clone(&self.sessions);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep(&sessions, max_age).await;
                        if removed > 0 {
                            info!(removed, "Swept stale sessions");
                        }
                    }
                }
            }
        });

        let previous = self.sweeper.lock().replace(Sweeper { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Stop the sweeper and every session's auto-refresh loop.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.cancel.cancel();
            if let Err(e) = sweeper.handle.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "Session sweeper ended abnormally");
            }
        }

        let sessions: Vec<SessionState> = self.sessions.read().values().cloned().collect();
        for state in sessions {
            state.disable_auto_refresh().await;
        }
    }
}

async fn sweep(sessions: &RwLock<HashMap<String, SessionState>>, max_age: Duration) -> usize {
    let Ok(age) = chrono::Duration::from_std(max_age) else {
        return 0;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
        return 0;
    };

    let removed: Vec<SessionState> = {
        let mut sessions = sessions.write();
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, state)| state.created_at() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        stale.iter().filter_map(|id| sessions.remove(id)).collect()
    };

    for state in &removed {
        debug!(session_id = %state.id(), "Reclaiming stale session");
        state.disable_auto_refresh().await;
    }
    removed.len()
}
