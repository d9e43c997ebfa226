//! HTTP and WebSocket routes.

pub mod health;
pub mod ws;

pub use health::{HealthResponse, StatsResponse, health_routes};
pub use ws::{ClientMessage, ServerMessage, ws_handler};
