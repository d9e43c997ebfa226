//! WebSocket message handlers.

use crate::connections::ConnectionId;
use crate::state::AppState;

use super::protocol::{ClientMessage, ServerMessage};

/// Trigger name used when the client does not say which detector fired.
const DEFAULT_TRIGGER: &str = "client";

/// Handle a client message, returning the reply to queue, if any.
pub async fn handle_message(
    msg: ClientMessage,
    connection_id: ConnectionId,
    state: &AppState,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),

        ClientMessage::Subscribe { topic } => Some(handle_subscribe(topic, connection_id, state)),

        ClientMessage::Unsubscribe { topic } => {
            let removed = state.connections.unsubscribe(connection_id, &topic);
            Some(ServerMessage::Unsubscribed { topic, removed })
        }

        ClientMessage::BargeIn { trigger, stage } => {
            let trigger = trigger.as_deref().unwrap_or(DEFAULT_TRIGGER);
            let stage = stage.as_deref().unwrap_or("unknown");
            let outcome = state.barge_in.handle(connection_id, trigger, stage).await;
            Some(ServerMessage::BargeIn {
                outcome: outcome.into(),
            })
        }
    }
}

fn handle_subscribe(topic: String, connection_id: ConnectionId, state: &AppState) -> ServerMessage {
    if topic.trim().is_empty() {
        return ServerMessage::error("invalid_topic", "Topic must not be empty");
    }
    if state.connections.subscribe(connection_id, &topic) {
        tracing::debug!(connection_id = %connection_id, topic = %topic, "Subscribed to topic");
        ServerMessage::Subscribed { topic }
    } else {
        ServerMessage::error("not_registered", "Connection is no longer registered")
    }
}
