//! Per-session conversational state for Parley.
//!
//! This crate provides:
//! - [`SessionState`]: core memory, per-agent chat threads and a playback
//!   queue, serializable to a single blob
//! - [`SharedStore`]: the key/value contract used to replicate sessions
//!   across processes, with an in-memory [`MemoryStore`]
//! - [`SessionRegistry`]: thread-safe session directory with resume,
//!   stale sweep and supervised background tasks
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_session::{MemoryStore, SessionConfig, SessionRegistry};
//!
//! let store: SharedStoreRef = Arc::new(MemoryStore::new());
//! let registry = SessionRegistry::new(SessionConfig::default());
//! let (session, origin) = registry.resume_or_create(Some("ab12cd34ef56"), &store).await;
//! session.ensure_system_prompt("triage", "You are a helpful voice agent.");
//! session.persist_background(store.clone());
//! ```

mod config;
mod error;
mod playback;
mod registry;
mod state;
mod store;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use playback::{PlaybackQueue, PlaybackStatus};
pub use registry::{SessionOrigin, SessionRegistry};
pub use state::{
    ACTIVE_AGENT_KEY, ChatMessage, Role, SessionContext, SessionState, generate_session_id,
};
pub use store::{MemoryStore, SESSION_KEY_PREFIX, SharedStore, SharedStoreRef, session_key};
