//! WebSocket protocol types for client-server communication.

use serde::{Deserialize, Serialize};

use crate::barge_in::BargeInOutcome;
use crate::connections::ConnectionId;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsParams {
    pub client_type: Option<String>,
    pub session_id: Option<String>,
    pub call_id: Option<String>,
    pub user_id: Option<String>,
    /// Comma-separated topic list.
    pub topics: Option<String>,
}

impl WsParams {
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving broadcasts for a topic.
    Subscribe { topic: String },
    /// Stop receiving broadcasts for a topic.
    Unsubscribe { topic: String },
    /// The user started speaking over the assistant.
    BargeIn {
        /// Detector that fired (e.g. "vad", "stt").
        #[serde(default)]
        trigger: Option<String>,
        /// Pipeline stage the client was in.
        #[serde(default)]
        stage: Option<String>,
    },
    /// Ping to keep connection alive.
    Ping,
}

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after registration.
    Welcome {
        connection_id: ConnectionId,
        session_id: String,
        /// "active", "resumed" or "created".
        session: String,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
        removed: bool,
    },
    BargeIn {
        #[serde(flatten)]
        outcome: BargeInOutcomeWire,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

/// Wire form of [`BargeInOutcome`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInOutcomeWire {
    pub handled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<BargeInOutcome> for BargeInOutcomeWire {
    fn from(outcome: BargeInOutcome) -> Self {
        match outcome {
            BargeInOutcome::Handled => Self {
                handled: true,
                reason: None,
            },
            BargeInOutcome::Suppressed(reason) => Self {
                handled: false,
                reason: serde_json::to_value(reason)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string)),
            },
        }
    }
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
