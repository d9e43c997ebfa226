//! WebSocket endpoint.
//!
//! Each socket is registered with the connection registry; everything the
//! server sends to it, replies included, goes through that connection's
//! outbound queue so ordering holds across replies and broadcasts.
//!
//! ## Module Structure
//!
//! - `protocol` - Message types (ClientMessage, ServerMessage)
//! - `connection` - Connection lifecycle
//! - `handlers` - Message processing logic

mod connection;
mod handlers;
mod protocol;

use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    response::Response,
};

use crate::error::Result;
use crate::state::AppState;

pub use connection::{CLOSE_TRY_AGAIN_LATER, IDLE_TIMEOUT};
pub use protocol::{BargeInOutcomeWire, ClientMessage, ServerMessage, WsParams};

/// GET /ws - WebSocket upgrade handler.
///
/// A full registry answers 503 before the upgrade. A slot taken between this
/// check and registration still closes the socket with 1013.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response> {
    state.connections.check_capacity()?;

    let max_size = state.config.max_ws_message_size;
    Ok(ws
        .max_message_size(max_size)
        .on_upgrade(move |socket| connection::handle_socket(socket, state, params)))
}
