//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Boxed error returned by handler and synthesizer hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`Transport`](crate::connections::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone; nothing more can be sent.
    #[error("Transport closed")]
    Closed,

    /// The underlying socket reported an error.
    #[error("Transport error: {0}")]
    Failed(String),
}

/// Errors raised synchronously by the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is at its connection limit.
    #[error("Connection limit reached ({max} connections)")]
    CapacityExceeded { max: usize },

    /// The transport could not be accepted.
    #[error("Failed to accept transport: {0}")]
    Accept(#[source] TransportError),
}

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Connection registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ServerError::Registry(RegistryError::CapacityExceeded { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded")
            }
            ServerError::Registry(RegistryError::Accept(_)) => {
                (StatusCode::BAD_REQUEST, "accept_failed")
            }
        };

        let message = self.to_string();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(status = %status, code, error = %message, "Server error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_maps_to_503() {
        let err = ServerError::from(RegistryError::CapacityExceeded { max: 2 });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_maps_to_500() {
        let response = ServerError::Internal("bind".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_registry_error_message() {
        let err = RegistryError::CapacityExceeded { max: 500 };
        assert_eq!(err.to_string(), "Connection limit reached (500 connections)");
    }
}
