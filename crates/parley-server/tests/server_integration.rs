//! End-to-end tests over real HTTP and WebSocket connections.

mod common;

use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use common::TestServer;
use parley_server::RegistryConfig;
use parley_session::session_key;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestServer, query: &str) -> Result<Socket> {
    let (socket, _) = connect_async(server.ws_url(query)).await?;
    Ok(socket)
}

/// Read the next JSON text frame, skipping control frames.
async fn next_json(socket: &mut Socket) -> Result<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for a message"))?
            .ok_or_else(|| anyhow!("socket closed"))??;
        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            Message::Close(frame) => return Err(anyhow!("closed: {:?}", frame)),
            _ => continue,
        }
    }
}

async fn send_json(socket: &mut Socket, value: Value) -> Result<()> {
    socket.send(Message::text(value.to_string())).await?;
    Ok(())
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server.get("/health").send().await?;
    assert!(resp.status().is_success());

    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_stats_reflect_connections() -> Result<()> {
    let server = TestServer::start().await?;

    let body: Value = server.get("/stats").send().await?.json().await?;
    assert_eq!(body["connections"]["connections"], 0);
    assert_eq!(body["sessions"], 0);

    let mut socket = connect(&server, "session_id=stats-session").await?;
    next_json(&mut socket).await?;

    let body: Value = server.get("/stats").send().await?.json().await?;
    assert_eq!(body["connections"]["connections"], 1);
    assert_eq!(body["connections"]["by_session"]["stats-session"], 1);
    assert_eq!(body["sessions"], 1);
    Ok(())
}

#[tokio::test]
async fn test_welcome_then_ping_and_subscribe() -> Result<()> {
    let server = TestServer::start().await?;
    let mut socket = connect(&server, "client_type=conversation&session_id=abc").await?;

    let welcome = next_json(&mut socket).await?;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["session_id"], "abc");
    assert_eq!(welcome["session"], "created");

    send_json(&mut socket, json!({"type": "ping"})).await?;
    assert_eq!(next_json(&mut socket).await?["type"], "pong");

    send_json(&mut socket, json!({"type": "subscribe", "topic": "transcripts"})).await?;
    let reply = next_json(&mut socket).await?;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["topic"], "transcripts");
    assert_eq!(server.state.connections.topic_members("transcripts").len(), 1);

    let delivered = server
        .state
        .connections
        .broadcast_topic("transcripts", &json!({"type": "transcript", "text": "hi"}));
    assert_eq!(delivered, 1);
    assert_eq!(next_json(&mut socket).await?["text"], "hi");
    Ok(())
}

#[tokio::test]
async fn test_malformed_message_gets_error_reply() -> Result<()> {
    let server = TestServer::start().await?;
    let mut socket = connect(&server, "").await?;
    next_json(&mut socket).await?;

    socket.send(Message::text("not json")).await?;
    let reply = next_json(&mut socket).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "parse_error");

    // The connection survives bad input.
    send_json(&mut socket, json!({"type": "ping"})).await?;
    assert_eq!(next_json(&mut socket).await?["type"], "pong");
    Ok(())
}

#[tokio::test]
async fn test_barge_in_while_idle_is_suppressed() -> Result<()> {
    let server = TestServer::start().await?;
    let mut socket = connect(&server, "").await?;
    next_json(&mut socket).await?;

    send_json(&mut socket, json!({"type": "barge_in", "trigger": "vad"})).await?;
    let reply = next_json(&mut socket).await?;
    assert_eq!(reply["type"], "barge_in");
    assert_eq!(reply["handled"], false);
    assert_eq!(reply["reason"], "idle");
    Ok(())
}

#[tokio::test]
async fn test_barge_in_cancels_active_synthesis() -> Result<()> {
    let server = TestServer::start().await?;
    let mut socket = connect(&server, "").await?;
    let welcome = next_json(&mut socket).await?;
    let id = parley_server::ConnectionId::parse(welcome["connection_id"].as_str().unwrap_or_default())
        .ok_or_else(|| anyhow!("bad connection id"))?;

    let voice = server
        .state
        .connections
        .voice(id)
        .ok_or_else(|| anyhow!("no voice control"))?;
    let token = voice.synthesis_started();

    send_json(&mut socket, json!({"type": "barge_in", "trigger": "vad", "stage": "speaking"})).await?;

    let mut types = Vec::new();
    for _ in 0..3 {
        let msg = next_json(&mut socket).await?;
        types.push(msg["type"].as_str().unwrap_or_default().to_string());
    }
    assert_eq!(types, vec!["tts_cancelled", "audio_stop", "barge_in"]);
    assert!(token.is_cancelled());
    assert!(!voice.is_synthesizing());
    assert!(!voice.is_inflight());
    Ok(())
}

#[tokio::test]
async fn test_session_broadcast_reaches_every_member() -> Result<()> {
    let server = TestServer::start().await?;
    let mut first = connect(&server, "session_id=shared").await?;
    assert_eq!(next_json(&mut first).await?["session"], "created");
    let mut second = connect(&server, "session_id=shared").await?;
    assert_eq!(next_json(&mut second).await?["session"], "active");
    let mut other = connect(&server, "session_id=elsewhere").await?;
    next_json(&mut other).await?;

    let delivered = server
        .state
        .connections
        .broadcast_session("shared", &json!({"type": "assistant", "text": "hello"}));
    assert_eq!(delivered, 2);

    assert_eq!(next_json(&mut first).await?["text"], "hello");
    assert_eq!(next_json(&mut second).await?["text"], "hello");

    send_json(&mut other, json!({"type": "ping"})).await?;
    assert_eq!(next_json(&mut other).await?["type"], "pong");
    Ok(())
}

#[tokio::test]
async fn test_capacity_rejects_before_upgrade() -> Result<()> {
    let server =
        TestServer::start_with(RegistryConfig::default().with_max_connections(1)).await?;

    let mut admitted = connect(&server, "").await?;
    assert_eq!(next_json(&mut admitted).await?["type"], "welcome");

    match connect_async(server.ws_url("")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 503);
            if let Some(body) = response.body() {
                let body: Value = serde_json::from_slice(body)?;
                assert_eq!(body["code"], "capacity_exceeded");
            }
        }
        Err(e) => panic!("expected HTTP 503, got {:?}", e),
        Ok(_) => panic!("upgrade should have been refused"),
    }

    assert_eq!(server.state.connections.connection_count(), 1);
    let stats: Value = server.get("/stats").send().await?.json().await?;
    assert_eq!(stats["connections"]["rejected_count"], 1);
    Ok(())
}

#[tokio::test]
async fn test_last_disconnect_persists_and_resumes_session() -> Result<()> {
    let server = TestServer::start().await?;

    let mut socket = connect(&server, "session_id=durable").await?;
    next_json(&mut socket).await?;
    let session = server
        .state
        .sessions
        .get_session("durable")
        .ok_or_else(|| anyhow!("session missing"))?;
    session.set("greeting", "hello");

    socket.close(None).await?;
    drop(socket);

    let state = server.state.clone();
    assert!(wait_until(|| state.connections.connection_count() == 0).await);
    assert!(wait_until(|| !state.sessions.contains("durable")).await);
    let store = server.store.clone();
    assert!(wait_until(|| store.get(&session_key("durable")).is_some()).await);

    let mut socket = connect(&server, "session_id=durable").await?;
    let welcome = next_json(&mut socket).await?;
    assert_eq!(welcome["session"], "resumed");

    let resumed = server
        .state
        .sessions
        .get_session("durable")
        .ok_or_else(|| anyhow!("session missing"))?;
    assert_eq!(resumed.get("greeting"), Some(json!("hello")));
    Ok(())
}
