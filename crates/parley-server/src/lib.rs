//! Connection management and WebSocket server for Parley.
//!
//! This crate holds the concurrent core that sits between voice clients and
//! the conversation orchestrator:
//!
//! - [`ConnectionRegistry`]: live connections with session/call/topic
//!   indices and an ordered, drop-oldest outbound queue per connection
//! - [`BargeInCoordinator`]: cancels assistant output when the user talks
//!   over it, callable from any thread
//! - [`AppState`]: the composition root wiring registries, the shared store
//!   and resource pools together
//! - a thin axum surface: `/health`, `/stats` and `/ws`
//!
//! # Example
//!
//! ```ignore
//! use parley_server::{AppState, Server, ServerConfig};
//! use parley_session::{MemoryStore, SessionConfig};
//!
//! let state = AppState::new(ServerConfig::default(), SessionConfig::default(), Arc::new(MemoryStore::new()));
//! Server::from_state(state).run().await?;
//! ```

pub mod barge_in;
pub mod config;
pub mod connections;
pub mod error;
pub mod routes;
pub mod state;

pub use barge_in::{
    BargeInCoordinator, BargeInOutcome, BargeInStats, SpeechSynthesizer, SuppressReason,
    VoiceControl, VoiceStatus,
};
pub use config::{BargeInConfig, RegistryConfig, ServerConfig};
pub use connections::{
    ClientType, ConnectionHandler, ConnectionId, ConnectionInfo, ConnectionRegistry, Envelope,
    Registration, RegistryStats, Transport, WsTransport,
};
pub use error::{BoxError, RegistryError, Result, ServerError, TransportError};
pub use state::{AppState, ManagedPool};

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The Parley HTTP/WebSocket server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            .merge(routes::health_routes())
            .route("/ws", get(routes::ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server on the configured address until the process ends.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.serve(addr, std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then stop every component.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_address;
        self.serve(addr, shutdown).await
    }

    async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;

        self.state.start();
        info!("Starting server on {}", addr);

        // Close sockets first so their read loops end and the graceful
        // shutdown below can complete.
        let state = self.state.clone();
        let signal = async move {
            shutdown.await;
            info!("Shutdown requested");
            state.connections.shutdown().await;
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        self.state.shutdown().await;
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
