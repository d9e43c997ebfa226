//! Live connection registry.
//!
//! The registry owns every live connection together with three secondary
//! indices (session, call and topic). The primary map and the indices are
//! mutated together under one lock. Each connection also owns a bounded
//! outbound queue, drained in order by exactly one sender task, so callers
//! never wait on network I/O when sending.

mod queue;
mod transport;
mod types;

pub use transport::{ConnectionHandler, Transport, WsTransport};
pub use types::{
    ClientType, ConnectionId, ConnectionInfo, DEFAULT_SENDER, Envelope, Registration,
    RegistryStats,
};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::barge_in::VoiceControl;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use queue::{Outbound, OutboundQueue};

/// Everything the sender task and the send paths need, shared outside the
/// registry lock.
struct Link {
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    queue: OutboundQueue,
    handler: Option<Arc<dyn ConnectionHandler>>,
    voice: Arc<VoiceControl>,
    sender: Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
}

struct Connection {
    client_type: ClientType,
    session_id: Option<String>,
    call_id: Option<String>,
    user_id: Option<String>,
    topics: HashSet<String>,
    created_at: DateTime<Utc>,
    link: Arc<Link>,
}

impl Connection {
    fn info(&self) -> ConnectionInfo {
        let mut topics: Vec<String> = self.topics.iter().cloned().collect();
        topics.sort();
        ConnectionInfo {
            id: self.link.id,
            client_type: self.client_type,
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            user_id: self.user_id.clone(),
            topics,
            created_at: self.created_at,
            queued: self.link.queue.len(),
            dropped_messages: self.link.queue.dropped(),
        }
    }
}

type Index = HashMap<String, HashSet<ConnectionId>>;

fn index_add(index: &mut Index, key: &str, id: ConnectionId) {
    index.entry(key.to_string()).or_default().insert(id);
}

fn index_remove(index: &mut Index, key: &str, id: ConnectionId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn index_sizes(index: &Index) -> std::collections::BTreeMap<String, usize> {
    index.iter().map(|(k, ids)| (k.clone(), ids.len())).collect()
}

/// Primary map plus indices; always mutated together.
#[derive(Default)]
struct Directory {
    connections: HashMap<ConnectionId, Connection>,
    by_session: Index,
    by_call: Index,
    by_topic: Index,
}

impl Directory {
    fn insert(&mut self, connection: Connection) {
        let id = connection.link.id;
        if let Some(session_id) = &connection.session_id {
            index_add(&mut self.by_session, session_id, id);
        }
        if let Some(call_id) = &connection.call_id {
            index_add(&mut self.by_call, call_id, id);
        }
        for topic in &connection.topics {
            index_add(&mut self.by_topic, topic, id);
        }
        self.connections.insert(id, connection);
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(session_id) = &connection.session_id {
            index_remove(&mut self.by_session, session_id, id);
        }
        if let Some(call_id) = &connection.call_id {
            index_remove(&mut self.by_call, call_id, id);
        }
        for topic in &connection.topics {
            index_remove(&mut self.by_topic, topic, id);
        }
        Some(connection)
    }

    fn links(&self, ids: Option<&HashSet<ConnectionId>>) -> Vec<Arc<Link>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|c| Arc::clone(&c.link))
            .collect()
    }
}

struct RegistryInner {
    config: RegistryConfig,
    directory: Mutex<Directory>,
    rejected: AtomicU64,
    /// Drops counted by connections that are no longer registered.
    retired_dropped: AtomicU64,
}

/// Registry of live connections.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                directory: Mutex::new(Directory::default()),
                rejected: AtomicU64::new(0),
                retired_dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn at_capacity(&self, current: usize) -> bool {
        self.inner.config.limit_enabled && current >= self.inner.config.max_connections
    }

    fn reject(&self, current: usize) -> RegistryError {
        let rejected = self.inner.rejected.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            connections = current,
            max = self.inner.config.max_connections,
            rejected,
            "Connection rejected: at capacity"
        );
        RegistryError::CapacityExceeded {
            max: self.inner.config.max_connections,
        }
    }

    /// Reject early when the registry is full, before anything is accepted.
    ///
    /// Counts as a rejection. [`register`](Self::register) still enforces the
    /// limit, since a slot can fill between this check and registration.
    pub fn check_capacity(&self) -> Result<(), RegistryError> {
        let current = self.connection_count();
        if self.at_capacity(current) {
            return Err(self.reject(current));
        }
        Ok(())
    }

    /// Accept and register a transport, starting its sender task.
    ///
    /// Fails immediately with [`RegistryError::CapacityExceeded`] when the
    /// limit is enabled and reached.
    pub async fn register(
        &self,
        transport: Arc<dyn Transport>,
        registration: Registration,
    ) -> Result<ConnectionId, RegistryError> {
        self.check_capacity()?;

        transport
            .accept_if_needed()
            .await
            .map_err(RegistryError::Accept)?;

        let id = ConnectionId::new();
        let link = Arc::new(Link {
            id,
            transport,
            queue: OutboundQueue::new(self.inner.config.queue_capacity),
            handler: registration.handler,
            voice: Arc::new(VoiceControl::new()),
            sender: Mutex::new(None),
            closing: AtomicBool::new(false),
        });
        let connection = Connection {
            client_type: registration.client_type,
            session_id: registration.session_id,
            call_id: registration.call_id,
            user_id: registration.user_id,
            topics: registration.topics,
            created_at: Utc::now(),
            link: Arc::clone(&link),
        };
        let (client_type, session_id) = (connection.client_type, connection.session_id.clone());

        // Re-check under the lock: other registrations may have landed while
        // the transport was being accepted.
        {
            let mut directory = self.inner.directory.lock();
            let current = directory.connections.len();
            if self.at_capacity(current) {
                drop(directory);
                return Err(self.reject(current));
            }
            directory.insert(connection);
        }

        let handle = tokio::spawn(run_sender(
            Arc::clone(&link),
            Arc::downgrade(&self.inner),
        ));
        *link.sender.lock() = Some(handle);

        info!(
            connection_id = %id,
            client_type = %client_type,
            session_id = session_id.as_deref().unwrap_or(""),
            "Connection registered"
        );
        Ok(id)
    }

    /// Remove a connection, stop its handler and close it.
    ///
    /// Unknown ids are ignored. Returns whether the connection was present.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.inner.directory.lock().remove(id);
        let Some(connection) = removed else {
            trace!(connection_id = %id, "Unregister for unknown connection");
            return false;
        };
        let link = connection.link;

        link.voice.teardown();
        if let Some(handler) = &link.handler
            && let Err(e) = handler.stop().await
        {
            warn!(connection_id = %id, error = %e, "Connection handler failed to stop");
        }

        close_link(&link, &self.inner.config).await;
        self.inner
            .retired_dropped
            .fetch_add(link.queue.dropped(), Ordering::Relaxed);

        info!(
            connection_id = %id,
            session_id = connection.session_id.as_deref().unwrap_or(""),
            "Connection unregistered"
        );
        true
    }

    fn unregister_in_background(&self, id: ConnectionId) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.unregister(id).await;
        });
    }

    fn link(&self, id: ConnectionId) -> Option<Arc<Link>> {
        self.inner
            .directory
            .lock()
            .connections
            .get(&id)
            .map(|c| Arc::clone(&c.link))
    }

    /// Serialize `payload` and queue it for one connection.
    ///
    /// Returns `false` if the connection is unknown or closing.
    pub fn send_to<T: Serialize + ?Sized>(&self, id: ConnectionId, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(id, text),
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Failed to serialize outbound payload");
                false
            }
        }
    }

    /// Queue pre-serialized text for one connection.
    pub fn send_text(&self, id: ConnectionId, text: impl Into<Arc<str>>) -> bool {
        let Some(link) = self.link(id) else {
            return false;
        };
        link.queue.push(text.into())
    }

    fn fan_out<T: Serialize + ?Sized>(
        &self,
        targets: Vec<Arc<Link>>,
        payload: &T,
        scope: &'static str,
    ) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let text: Arc<str> = match serde_json::to_string(payload) {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(scope, error = %e, "Failed to serialize broadcast payload");
                return 0;
            }
        };

        let mut delivered = 0;
        for link in targets {
            if link.queue.push(Arc::clone(&text)) {
                delivered += 1;
            } else {
                debug!(connection_id = %link.id, scope, "Broadcast target closed, removing");
                self.unregister_in_background(link.id);
            }
        }
        delivered
    }

    /// Queue `payload` for every connection in the session.
    pub fn broadcast_session<T: Serialize + ?Sized>(&self, session_id: &str, payload: &T) -> usize {
        let targets = {
            let directory = self.inner.directory.lock();
            directory.links(directory.by_session.get(session_id))
        };
        self.fan_out(targets, payload, "session")
    }

    /// Queue `payload` for every connection on the call.
    pub fn broadcast_call<T: Serialize + ?Sized>(&self, call_id: &str, payload: &T) -> usize {
        let targets = {
            let directory = self.inner.directory.lock();
            directory.links(directory.by_call.get(call_id))
        };
        self.fan_out(targets, payload, "call")
    }

    /// Queue `payload` for every connection subscribed to the topic.
    pub fn broadcast_topic<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> usize {
        let targets = {
            let directory = self.inner.directory.lock();
            directory.links(directory.by_topic.get(topic))
        };
        self.fan_out(targets, payload, "topic")
    }

    /// Queue `payload` for every live connection.
    pub fn broadcast_all<T: Serialize + ?Sized>(&self, payload: &T) -> usize {
        let targets: Vec<Arc<Link>> = self
            .inner
            .directory
            .lock()
            .connections
            .values()
            .map(|c| Arc::clone(&c.link))
            .collect();
        self.fan_out(targets, payload, "all")
    }

    /// Add a topic subscription. Returns `false` if the connection is unknown.
    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> bool {
        let mut directory = self.inner.directory.lock();
        let Some(connection) = directory.connections.get_mut(&id) else {
            return false;
        };
        if connection.topics.insert(topic.to_string()) {
            index_add(&mut directory.by_topic, topic, id);
        }
        true
    }

    /// Drop a topic subscription. Returns `false` if the connection is
    /// unknown or was not subscribed.
    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) -> bool {
        let mut directory = self.inner.directory.lock();
        let Some(connection) = directory.connections.get_mut(&id) else {
            return false;
        };
        if !connection.topics.remove(topic) {
            return false;
        }
        index_remove(&mut directory.by_topic, topic, id);
        true
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.inner
            .directory
            .lock()
            .connections
            .get(&id)
            .map(Connection::info)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.directory.lock().connections.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.directory.lock().connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner
            .directory
            .lock()
            .connections
            .keys()
            .copied()
            .collect()
    }

    /// Connections currently indexed under the session.
    pub fn session_members(&self, session_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .directory
            .lock()
            .by_session
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Connections currently indexed under the call.
    pub fn call_members(&self, call_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .directory
            .lock()
            .by_call
            .get(call_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Connections currently subscribed to the topic.
    pub fn topic_members(&self, topic: &str) -> HashSet<ConnectionId> {
        self.inner
            .directory
            .lock()
            .by_topic
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Voice state of a live connection.
    pub fn voice(&self, id: ConnectionId) -> Option<Arc<VoiceControl>> {
        self.link(id).map(|link| Arc::clone(&link.voice))
    }

    pub fn stats(&self) -> RegistryStats {
        let directory = self.inner.directory.lock();
        let live_dropped: u64 = directory
            .connections
            .values()
            .map(|c| c.link.queue.dropped())
            .sum();
        RegistryStats {
            connections: directory.connections.len(),
            max_connections: self.inner.config.max_connections,
            limit_enabled: self.inner.config.limit_enabled,
            rejected_count: self.inner.rejected.load(Ordering::Relaxed),
            by_session: index_sizes(&directory.by_session),
            by_call: index_sizes(&directory.by_call),
            by_topic: index_sizes(&directory.by_topic),
            dropped_messages: live_dropped
                + self.inner.retired_dropped.load(Ordering::Relaxed),
        }
    }

    /// Unregister every connection.
    pub async fn shutdown(&self) {
        let ids = self.connection_ids();
        let count = ids.len();
        futures::future::join_all(ids.into_iter().map(|id| self.unregister(id))).await;
        info!(count, "Connection registry shut down");
    }
}

/// Drain the connection's queue into its transport until closed or failed.
async fn run_sender(link: Arc<Link>, registry: Weak<RegistryInner>) {
    loop {
        let text = match link.queue.pop().await {
            Outbound::Text(text) => text,
            Outbound::Close => {
                trace!(connection_id = %link.id, "Sender drained, exiting");
                return;
            }
        };

        let result = if link.transport.is_connected() {
            link.transport.send_text(&text).await
        } else {
            Err(crate::error::TransportError::Closed)
        };

        if let Err(e) = result {
            debug!(connection_id = %link.id, error = %e, "Send failed, removing connection");
            link.queue.abandon();
            if let Some(inner) = registry.upgrade() {
                ConnectionRegistry { inner }.unregister_in_background(link.id);
            }
            return;
        }
    }
}

/// Stop the sender and close the transport. Safe to call more than once.
async fn close_link(link: &Link, config: &RegistryConfig) {
    if link.closing.swap(true, Ordering::SeqCst) {
        return;
    }

    link.queue.close();
    let handle = link.sender.lock().take();
    if let Some(mut handle) = handle
        && tokio::time::timeout(config.close_grace, &mut handle)
            .await
            .is_err()
    {
        debug!(connection_id = %link.id, "Sender did not drain in time, aborting");
        handle.abort();
    }

    if link.transport.is_connected()
        && let Err(e) = link.transport.close().await
    {
        debug!(connection_id = %link.id, error = %e, "Error closing transport");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CountingHandler, MockTransport};
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(
            RegistryConfig::new()
                .with_max_connections(8)
                .with_close_grace(Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn test_session_and_topic_fan_out() {
        let registry = registry();
        let a = MockTransport::new();
        let b = MockTransport::new();
        registry
            .register(
                a.clone(),
                Registration::new(ClientType::Dashboard)
                    .with_session("s1")
                    .with_topic("dashboard"),
            )
            .await
            .unwrap();
        registry
            .register(
                b.clone(),
                Registration::new(ClientType::Conversation)
                    .with_session("s1")
                    .with_topic("conversation"),
            )
            .await
            .unwrap();

        assert_eq!(registry.broadcast_session("s1", &json!({"type": "status"})), 2);
        assert_eq!(a.wait_for(1).await.len(), 1);
        assert_eq!(b.wait_for(1).await.len(), 1);

        assert_eq!(registry.broadcast_topic("dashboard", &json!({"type": "metrics"})), 1);
        assert_eq!(a.wait_for(2).await.len(), 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_preserves_order() {
        let registry = registry();
        let transport = MockTransport::new();
        let id = registry
            .register(transport.clone(), Registration::default())
            .await
            .unwrap();

        for i in 0..50 {
            assert!(registry.send_to(id, &json!({"seq": i})));
        }

        transport.wait_for(50).await;
        let seqs: Vec<i64> = transport
            .values()
            .iter()
            .filter_map(|v| v["seq"].as_i64())
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = registry();
        assert!(!registry.send_to(ConnectionId::new(), &json!({})));
        assert!(!registry.send_text(ConnectionId::new(), "raw"));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = ConnectionRegistry::new(RegistryConfig::new().with_max_connections(2));
        let first = registry
            .register(MockTransport::new(), Registration::default())
            .await
            .unwrap();
        registry
            .register(MockTransport::new(), Registration::default())
            .await
            .unwrap();

        let err = registry
            .register(MockTransport::new(), Registration::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { max: 2 }));
        assert_eq!(registry.stats().rejected_count, 1);
        assert_eq!(registry.connection_count(), 2);

        assert!(registry.check_capacity().is_err());
        assert_eq!(registry.stats().rejected_count, 2);

        registry.unregister(first).await;
        assert!(registry.check_capacity().is_ok());
        assert!(
            registry
                .register(MockTransport::new(), Registration::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_limit_disabled() {
        let registry = ConnectionRegistry::new(
            RegistryConfig::new()
                .with_max_connections(1)
                .with_limit_enabled(false),
        );
        for _ in 0..3 {
            registry
                .register(MockTransport::new(), Registration::default())
                .await
                .unwrap();
        }
        assert_eq!(registry.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_unregister_clears_every_index() {
        let registry = registry();
        let handler = Arc::new(CountingHandler::default());
        let transport = MockTransport::new();
        let id = registry
            .register(
                transport.clone(),
                Registration::new(ClientType::Media)
                    .with_session("s1")
                    .with_call("c1")
                    .with_topics(["a", "b"])
                    .with_handler(handler.clone()),
            )
            .await
            .unwrap();

        assert!(registry.session_members("s1").contains(&id));
        assert!(registry.call_members("c1").contains(&id));
        assert!(registry.topic_members("b").contains(&id));

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);

        let stats = registry.stats();
        assert_eq!(stats.connections, 0);
        assert!(stats.by_session.is_empty());
        assert!(stats.by_call.is_empty());
        assert!(stats.by_topic.is_empty());
        assert_eq!(handler.stops.load(Ordering::SeqCst), 1);
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handler_stop_error_is_swallowed() {
        let registry = registry();
        let handler = Arc::new(CountingHandler {
            fail: true,
            ..Default::default()
        });
        let id = registry
            .register(
                MockTransport::new(),
                Registration::default().with_handler(handler.clone()),
            )
            .await
            .unwrap();

        assert!(registry.unregister(id).await);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_unregister_drains_queued_messages() {
        let registry = registry();
        let transport = MockTransport::new();
        let id = registry
            .register(transport.clone(), Registration::default())
            .await
            .unwrap();

        registry.send_text(id, "one");
        registry.send_text(id, "two");
        registry.unregister(id).await;

        assert_eq!(transport.messages(), vec!["one", "two"]);
        assert!(!registry.send_text(id, "three"));
    }

    #[tokio::test]
    async fn test_send_failure_unregisters() {
        let registry = registry();
        let healthy = MockTransport::new();
        let broken = MockTransport::new();
        broken.fail_sends.store(true, Ordering::SeqCst);

        registry
            .register(healthy.clone(), Registration::default().with_session("s1"))
            .await
            .unwrap();
        let broken_id = registry
            .register(broken.clone(), Registration::default().with_session("s1"))
            .await
            .unwrap();

        assert_eq!(registry.broadcast_session("s1", &json!({"n": 1})), 2);
        for _ in 0..100 {
            if !registry.contains(broken_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!registry.contains(broken_id));
        assert_eq!(registry.session_members("s1").len(), 1);
        assert_eq!(healthy.wait_for(1).await.len(), 1);
        assert_eq!(registry.broadcast_session("s1", &json!({"n": 2})), 1);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let registry = registry();
        let id = registry
            .register(MockTransport::new(), Registration::default())
            .await
            .unwrap();

        assert!(registry.subscribe(id, "alerts"));
        assert!(registry.subscribe(id, "alerts"));
        assert_eq!(registry.topic_members("alerts").len(), 1);
        assert_eq!(registry.connection(id).unwrap().topics, vec!["alerts"]);

        assert!(registry.unsubscribe(id, "alerts"));
        assert!(!registry.unsubscribe(id, "alerts"));
        assert!(registry.topic_members("alerts").is_empty());
        assert!(!registry.subscribe(ConnectionId::new(), "alerts"));
    }

    #[tokio::test]
    async fn test_broadcast_all_and_stats() {
        let registry = registry();
        for topic in ["a", "a", "b"] {
            registry
                .register(
                    MockTransport::new(),
                    Registration::default().with_call("c1").with_topic(topic),
                )
                .await
                .unwrap();
        }

        assert_eq!(registry.broadcast_all(&json!({"type": "ping"})), 3);
        assert_eq!(registry.broadcast_call("c1", &json!({})), 3);
        assert_eq!(registry.broadcast_topic("missing", &json!({})), 0);

        let stats = registry.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.max_connections, 8);
        assert_eq!(stats.by_call.get("c1"), Some(&3));
        assert_eq!(stats.by_topic.get("a"), Some(&2));
        assert_eq!(stats.by_topic.get("b"), Some(&1));
    }

    #[tokio::test]
    async fn test_shutdown_unregisters_everything() {
        let registry = registry();
        let transports: Vec<_> = (0..3).map(|_| MockTransport::new()).collect();
        for transport in &transports {
            registry
                .register(transport.clone(), Registration::default())
                .await
                .unwrap();
        }

        registry.shutdown().await;
        assert_eq!(registry.connection_count(), 0);
        assert!(transports.iter().all(|t| t.closed.load(Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn test_unregister_cancels_voice_work() {
        let registry = registry();
        let id = registry
            .register(MockTransport::new(), Registration::default())
            .await
            .unwrap();
        let voice = registry.voice(id).unwrap();
        let token = voice.synthesis_started();

        registry.unregister(id).await;
        assert!(token.is_cancelled());
        assert!(registry.voice(id).is_none());
    }
}
