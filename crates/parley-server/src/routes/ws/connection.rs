//! WebSocket connection lifecycle.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use parley_session::{SessionOrigin, generate_session_id};

use super::handlers::handle_message;
use super::protocol::{ClientMessage, ServerMessage, WsParams};
use crate::connections::{ClientType, Registration, WsTransport};
use crate::error::RegistryError;
use crate::state::AppState;

/// Idle timeout for WebSocket connections (5 minutes).
/// Connections that receive no messages for this duration will be closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Close code sent when the server is at its connection limit ("try again later").
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

fn origin_label(origin: SessionOrigin) -> &'static str {
    match origin {
        SessionOrigin::Active => "active",
        SessionOrigin::Resumed => "resumed",
        SessionOrigin::Created => "created",
    }
}

/// Handle a WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: AppState, params: WsParams) {
    let (sink, mut receiver) = socket.split();
    let transport = Arc::new(WsTransport::new(sink));

    let session_id = params
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(generate_session_id);
    let client_type = params
        .client_type
        .as_deref()
        .map(ClientType::from)
        .unwrap_or_default();

    let mut registration = Registration::new(client_type)
        .with_session(session_id.clone())
        .with_topics(params.topic_list());
    if let Some(call_id) = params.call_id.clone() {
        registration = registration.with_call(call_id);
    }
    if let Some(user_id) = params.user_id.clone() {
        registration = registration.with_user(user_id);
    }

    let connection_id = match state.connections.register(transport.clone(), registration).await {
        Ok(id) => id,
        Err(e) => {
            let code = match e {
                RegistryError::CapacityExceeded { .. } => CLOSE_TRY_AGAIN_LATER,
                RegistryError::Accept(_) => 1011,
            };
            if let Err(close_err) = transport.close_with_reason(code, &e.to_string()).await {
                tracing::debug!(error = %close_err, "Failed to send rejection close frame");
            }
            return;
        }
    };

    let (session, origin) = state
        .sessions
        .resume_or_create(Some(&session_id), &state.store)
        .await;

    tracing::debug!(
        connection_id = %connection_id,
        session_id = %session.id(),
        client_type = %client_type,
        origin = origin_label(origin),
        "WebSocket connection established"
    );

    state.connections.send_to(
        connection_id,
        &ServerMessage::Welcome {
            connection_id,
            session_id: session_id.clone(),
            session: origin_label(origin).to_string(),
        },
    );

    let mut peer_gone = true;
    loop {
        // Wait for next message with idle timeout
        let msg = match tokio::time::timeout(IDLE_TIMEOUT, receiver.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket connection closed due to idle timeout");
                state.connections.send_to(
                    connection_id,
                    &ServerMessage::error("idle_timeout", "Connection closed due to inactivity"),
                );
                peer_gone = false;
                break;
            }
        };

        // Binary frames are accepted if they carry UTF-8 JSON.
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    state.connections.send_to(
                        connection_id,
                        &ServerMessage::error("invalid_message", "Binary data must be UTF-8"),
                    );
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                state.connections.send_to(
                    connection_id,
                    &ServerMessage::error("parse_error", format!("Invalid message: {}", e)),
                );
                continue;
            }
        };

        if let Some(reply) = handle_message(client_msg, connection_id, &state).await
            && !state.connections.send_to(connection_id, &reply)
        {
            break;
        }
    }

    // A departed peer cannot take the queued tail; skip straight to teardown.
    if peer_gone {
        transport.mark_disconnected();
    }
    state.connections.unregister(connection_id).await;
    state.release_session(&session_id).await;

    tracing::debug!(connection_id = %connection_id, "WebSocket connection closed");
}
