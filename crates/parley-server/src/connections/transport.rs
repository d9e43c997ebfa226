//! Transport and lifecycle-hook contracts consumed by the registry.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::Mutex;

use crate::error::{BoxError, TransportError};

/// A physical connection the registry can write to.
///
/// The registry never inspects payloads; it only forwards serialized text.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Complete the transport handshake if it has not happened yet.
    async fn accept_if_needed(&self) -> Result<(), TransportError>;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// Higher-level object owning a connection, stopped when it is unregistered.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn stop(&self) -> Result<(), BoxError>;
}

/// [`Transport`] over the write half of an axum WebSocket.
///
/// The upgrade has already been accepted by the time axum hands over the
/// socket, so `accept_if_needed` does nothing.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    connected: AtomicBool,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            connected: AtomicBool::new(true),
        }
    }

    /// Record that the read half observed the peer going away.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Send a close frame with a reason, then close the sink.
    pub async fn close_with_reason(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: reason.to_owned().into(),
        })))
        .await
        .map_err(|e| TransportError::Failed(e.to_string()))?;
        sink.close()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn accept_if_needed(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Text(text.to_owned().into())).await {
            self.connected.store(false, Ordering::Release);
            return Err(TransportError::Failed(e.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
