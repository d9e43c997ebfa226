//! Error types for session state operations.

/// Error type for session state operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session was not found in the registry or the shared store.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A stored blob could not be decoded, or state could not be encoded.
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from the shared store backend.
    #[error("Shared store error: {0}")]
    Store(String),
}

/// Result type for session state operations.
pub type Result<T> = std::result::Result<T, Error>;
