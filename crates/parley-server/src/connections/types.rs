//! Connection identifiers, metadata records and the outbound envelope.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::transport::ConnectionHandler;

/// Unique identifier for a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of client on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Dashboard,
    Conversation,
    Media,
    #[default]
    Other,
}

impl From<&str> for ClientType {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "dashboard" => Self::Dashboard,
            "conversation" => Self::Conversation,
            "media" => Self::Media,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dashboard => "dashboard",
            Self::Conversation => "conversation",
            Self::Media => "media",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Metadata supplied when registering a connection.
#[derive(Clone, Default)]
pub struct Registration {
    pub client_type: ClientType,
    pub session_id: Option<String>,
    pub call_id: Option<String>,
    pub user_id: Option<String>,
    pub topics: HashSet<String>,
    pub handler: Option<Arc<dyn ConnectionHandler>>,
}

impl Registration {
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type,
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Attach a lifecycle hook stopped during unregister.
    pub fn with_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("client_type", &self.client_type)
            .field("session_id", &self.session_id)
            .field("call_id", &self.call_id)
            .field("user_id", &self.user_id)
            .field("topics", &self.topics)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Snapshot of one connection's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub client_type: ClientType,
    pub session_id: Option<String>,
    pub call_id: Option<String>,
    pub user_id: Option<String>,
    /// Sorted topic subscriptions.
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub queued: usize,
    pub dropped_messages: u64,
}

/// Registry-wide counters and index sizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub max_connections: usize,
    pub limit_enabled: bool,
    pub rejected_count: u64,
    pub by_session: BTreeMap<String, usize>,
    pub by_call: BTreeMap<String, usize>,
    pub by_topic: BTreeMap<String, usize>,
    /// Messages evicted from full outbound queues, including closed connections.
    pub dropped_messages: u64,
}

/// Default `sender` for envelopes built by the server.
pub const DEFAULT_SENDER: &str = "parley";

/// Outbound message shape.
///
/// The registry only ever sees the serialized form; this type exists so
/// callers build envelopes consistently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            topic: topic.into(),
            session_id: None,
            call_id: None,
            user_id: None,
            sender: DEFAULT_SENDER.to_string(),
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_type_parsing() {
        assert_eq!(ClientType::from("Dashboard"), ClientType::Dashboard);
        assert_eq!(ClientType::from("media"), ClientType::Media);
        assert_eq!(ClientType::from("telephony"), ClientType::Other);
    }

    #[test]
    fn test_connection_id_parse() {
        let id = ConnectionId::new();
        assert_eq!(ConnectionId::parse(&id.to_string()), Some(id));
        assert_eq!(ConnectionId::parse("nope"), None);
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::new("status", "dashboard")
            .with_session("s1")
            .with_payload(json!({"state": "listening"}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["topic"], "dashboard");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["sender"], DEFAULT_SENDER);
        assert!(value.get("call_id").is_none());
        assert!(value["timestamp"].is_string());
        assert_eq!(value["payload"]["state"], "listening");
    }

    #[test]
    fn test_registration_builder() {
        let registration = Registration::new(ClientType::Conversation)
            .with_session("s1")
            .with_topics(["a", "b"])
            .with_topic("a");
        assert_eq!(registration.topics.len(), 2);
        assert_eq!(registration.session_id.as_deref(), Some("s1"));
    }
}
