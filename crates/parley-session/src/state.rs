//! Per-session conversational state.
//!
//! A [`SessionState`] holds three things:
//! - `core_memory`: flat string-keyed map of JSON values (slots, tool
//!   outputs, active agent, voice config, latency buckets)
//! - `chat_history`: one ordered thread of [`ChatMessage`]s per agent name
//! - a [`PlaybackQueue`] of pending TTS payloads
//!
//! Core memory and chat history are replicated to a [`SharedStore`] as a
//! single JSON blob under `session:<id>`. Handles are cheap to clone and all
//! clones observe the same state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::playback::{PlaybackQueue, PlaybackStatus};
use crate::store::{SharedStore, SharedStoreRef, session_key};

/// Core-memory key holding the name of the agent currently handling the session.
pub const ACTIVE_AGENT_KEY: &str = "active_agent";

/// Generate a short, human-scannable session identifier.
pub fn generate_session_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Speaker role of a chat history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of an agent's chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The replicated part of a session: core memory plus chat history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub core_memory: HashMap<String, Value>,

    #[serde(default)]
    pub chat_history: HashMap<String, Vec<ChatMessage>>,
}

impl SessionContext {
    /// Encode as the shared store's string format.
    pub fn to_blob(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the shared store's string format.
    pub fn from_blob(blob: &str) -> Result<Self> {
        Ok(serde_json::from_str(blob)?)
    }
}

/// A running auto-refresh loop.
struct AutoRefresh {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    async fn stop(self, session_id: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await
            && !e.is_cancelled()
        {
            warn!(session_id = %session_id, error = %e, "Auto-refresh task ended abnormally");
        }
    }
}

/// State container for one logical conversation.
#[derive(Clone)]
pub struct SessionState {
    id: String,
    created_at: DateTime<Utc>,
    store_ttl: Option<Duration>,
    context: Arc<RwLock<SessionContext>>,
    playback: Arc<Mutex<PlaybackQueue>>,
    refresh: Arc<Mutex<Option<AutoRefresh>>>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("auto_refresh", &self.auto_refresh_interval())
            .finish_non_exhaustive()
    }
}

impl SessionState {
    /// Create an empty session with the given id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_context(session_id, SessionContext::default())
    }

    /// Create an empty session with a freshly generated id.
    pub fn generate() -> Self {
        Self::new(generate_session_id())
    }

    /// Create a session around existing context.
    pub fn with_context(session_id: impl Into<String>, context: SessionContext) -> Self {
        Self {
            id: session_id.into(),
            created_at: Utc::now(),
            store_ttl: None,
            context: Arc::new(RwLock::new(context)),
            playback: Arc::new(Mutex::new(PlaybackQueue::new())),
            refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// Decode a session from a stored blob.
    pub fn from_blob(session_id: impl Into<String>, blob: &str) -> Result<Self> {
        Ok(Self::with_context(session_id, SessionContext::from_blob(blob)?))
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = ts;
        self
    }

    /// Set the TTL used when persisting to the shared store.
    pub fn with_store_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.store_ttl = ttl;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Shared-store key for this session.
    pub fn store_key(&self) -> String {
        session_key(&self.id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Core memory
    // ─────────────────────────────────────────────────────────────────────

    /// Read a core-memory value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.context.read().core_memory.get(key).cloned()
    }

    /// Read a core-memory value, falling back to `default`.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Read and deserialize a core-memory value. Mismatched types yield `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Write a core-memory value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.context
            .write()
            .core_memory
            .insert(key.into(), value.into())
    }

    /// Merge several values into core memory in one critical section.
    pub fn update<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut context = self.context.write();
        for (key, value) in partial {
            context.core_memory.insert(key.into(), value);
        }
    }

    /// Remove a core-memory value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.context.write().core_memory.remove(key)
    }

    /// Snapshot of the whole core memory.
    pub fn core_memory(&self) -> HashMap<String, Value> {
        self.context.read().core_memory.clone()
    }

    pub fn active_agent(&self) -> Option<String> {
        self.get_as(ACTIVE_AGENT_KEY)
    }

    pub fn set_active_agent(&self, agent: impl Into<String>) {
        self.set(ACTIVE_AGENT_KEY, Value::String(agent.into()));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat history
    // ─────────────────────────────────────────────────────────────────────

    /// Append a turn to an agent's thread.
    pub fn append_history(&self, agent: &str, role: Role, content: impl Into<String>) {
        self.context
            .write()
            .chat_history
            .entry(agent.to_string())
            .or_default()
            .push(ChatMessage::new(role, content));
    }

    /// Ordered copy of an agent's thread. Creates an empty thread if needed.
    pub fn get_history(&self, agent: &str) -> Vec<ChatMessage> {
        if let Some(thread) = self.context.read().chat_history.get(agent) {
            return thread.clone();
        }
        self.context
            .write()
            .chat_history
            .entry(agent.to_string())
            .or_default()
            .clone()
    }

    /// Clear one agent's thread, or every thread when `agent` is `None`.
    pub fn clear_history(&self, agent: Option<&str>) {
        let mut context = self.context.write();
        match agent {
            Some(agent) => {
                if let Some(thread) = context.chat_history.get_mut(agent) {
                    thread.clear();
                }
            }
            None => context.chat_history.clear(),
        }
    }

    /// Names of agents with a chat thread.
    pub fn history_agents(&self) -> Vec<String> {
        self.context.read().chat_history.keys().cloned().collect()
    }

    /// Make `prompt` the first entry of the agent's thread as a system message.
    ///
    /// An existing leading system entry is overwritten; otherwise a new one
    /// is inserted at index 0.
    pub fn ensure_system_prompt(&self, agent: &str, prompt: impl Into<String>) {
        let prompt = prompt.into();
        let mut context = self.context.write();
        let thread = context.chat_history.entry(agent.to_string()).or_default();
        match thread.first_mut() {
            Some(first) if first.role == Role::System => first.content = prompt,
            _ => thread.insert(0, ChatMessage::new(Role::System, prompt)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Serialization & replication
    // ─────────────────────────────────────────────────────────────────────

    /// Snapshot of core memory and chat history.
    pub fn context(&self) -> SessionContext {
        self.context.read().clone()
    }

    /// Encode core memory and chat history, read under the state lock.
    pub fn to_blob(&self) -> Result<String> {
        self.context.read().to_blob()
    }

    /// Replace core memory and chat history from a blob.
    pub fn load_blob(&self, blob: &str) -> Result<()> {
        let decoded = SessionContext::from_blob(blob)?;
        *self.context.write() = decoded;
        Ok(())
    }

    /// Write the session to the store and wait for the result.
    pub async fn persist(&self, store: &dyn SharedStore) -> Result<bool> {
        let blob = self.to_blob()?;
        store
            .set_string(&self.store_key(), &blob, self.store_ttl)
            .await
    }

    /// Write the session to the store without waiting.
    ///
    /// The snapshot is taken before returning; failures are logged only.
    pub fn persist_background(&self, store: SharedStoreRef) -> JoinHandle<()> {
        let snapshot = self.to_blob();
        let key = self.store_key();
        let ttl = self.store_ttl;
        let session_id = self.id.clone();

        tokio::spawn(async move {
            let blob = match snapshot {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(session_id = %session_id, stage = "persist_background", error = %e, "Failed to encode session");
                    return;
                }
            };
            match store.set_string(&key, &blob, ttl).await {
                Ok(true) => trace!(session_id = %session_id, "Session persisted"),
                Ok(false) => {
                    warn!(session_id = %session_id, stage = "persist_background", "Shared store rejected session write")
                }
                Err(e) => {
                    warn!(session_id = %session_id, stage = "persist_background", error = %e, "Failed to persist session")
                }
            }
        })
    }

    /// Pull the latest blob from the store and overwrite local context.
    ///
    /// Returns `Ok(false)` without touching local state when nothing is stored.
    pub async fn refresh(&self, store: &dyn SharedStore) -> Result<bool> {
        refresh_context(&self.id, &self.context, store).await
    }

    /// Start re-synchronizing from the store every `interval`.
    ///
    /// Replaces (and stops) any loop already running.
    pub async fn enable_auto_refresh(&self, store: SharedStoreRef, interval: Duration) {
        if interval.is_zero() {
            warn!(session_id = %self.id, "Ignoring zero auto-refresh interval");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_auto_refresh(
            self.id.clone(),
            Arc::clone(&self.context),
            store,
            interval,
            cancel.clone(),
        ));
        let task = AutoRefresh {
            interval,
            cancel,
            handle,
        };

        let previous = self.refresh.lock().replace(task);
        if let Some(previous) = previous {
            previous.stop(&self.id).await;
        }
        debug!(session_id = %self.id, interval_ms = interval.as_millis() as u64, "Auto-refresh enabled");
    }

    /// Stop the auto-refresh loop and wait for it to exit.
    ///
    /// Returns `false` if no loop was running.
    pub async fn disable_auto_refresh(&self) -> bool {
        let task = self.refresh.lock().take();
        match task {
            Some(task) => {
                task.stop(&self.id).await;
                debug!(session_id = %self.id, "Auto-refresh disabled");
                true
            }
            None => false,
        }
    }

    /// Interval of the running auto-refresh loop, if any.
    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.refresh.lock().as_ref().map(|t| t.interval)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback queue
    // ─────────────────────────────────────────────────────────────────────

    /// Queue a playback payload, returning the new queue length.
    pub fn enqueue_playback(&self, payload: Value) -> usize {
        self.playback.lock().enqueue(payload)
    }

    /// Take the next playback payload.
    pub fn next_playback(&self) -> Option<Value> {
        self.playback.lock().dequeue()
    }

    pub fn set_playback_processing(&self, processing: bool) {
        self.playback.lock().set_processing(processing);
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback.lock().status()
    }

    /// Clear pending playback and reset its flags atomically.
    pub fn interrupt_playback(&self) -> usize {
        self.playback.lock().interrupt()
    }

    /// Re-enable playback after an interrupt.
    pub fn resume_media(&self) {
        self.playback.lock().resume_media();
    }
}

async fn refresh_context(
    session_id: &str,
    context: &RwLock<SessionContext>,
    store: &dyn SharedStore,
) -> Result<bool> {
    let Some(blob) = store.get_string(&session_key(session_id)).await? else {
        return Ok(false);
    };
    let decoded = SessionContext::from_blob(&blob)?;
    *context.write() = decoded;
    Ok(true)
}

async fn run_auto_refresh(
    session_id: String,
    context: Arc<RwLock<SessionContext>>,
    store: SharedStoreRef,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match refresh_context(&session_id, &context, store.as_ref()).await {
                    Ok(true) => trace!(session_id = %session_id, "Session refreshed from store"),
                    Ok(false) => trace!(session_id = %session_id, "No stored session to refresh from"),
                    Err(e) => warn!(session_id = %session_id, stage = "auto_refresh", error = %e, "Session refresh failed"),
                }
            }
        }
    }
}
