//! Two registries sharing one store, standing in for two server processes.

use std::sync::Arc;
use std::time::Duration;

use parley_session::{
    MemoryStore, Role, SessionConfig, SessionOrigin, SessionRegistry, SharedStoreRef, session_key,
};
use serde_json::json;

fn shared_store() -> (Arc<MemoryStore>, SharedStoreRef) {
    let store = Arc::new(MemoryStore::new());
    let shared: SharedStoreRef = store.clone();
    (store, shared)
}

#[tokio::test]
async fn test_session_moves_between_processes() {
    let (raw, store) = shared_store();
    let first = SessionRegistry::new(SessionConfig::default());
    let second = SessionRegistry::new(SessionConfig::default());

    let (session, origin) = first.resume_or_create(Some("call-7"), &store).await;
    assert_eq!(origin, SessionOrigin::Created);
    session.set_active_agent("triage");
    session.ensure_system_prompt("triage", "Be brief.");
    session.append_history("triage", Role::User, "hello");
    session.persist(store.as_ref()).await.unwrap();
    assert!(raw.get(&session_key("call-7")).is_some());

    let (resumed, origin) = second.resume_or_create(Some("call-7"), &store).await;
    assert_eq!(origin, SessionOrigin::Resumed);
    assert_eq!(resumed.active_agent().as_deref(), Some("triage"));

    let history = resumed.get_history("triage");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].content, "hello");

    // Same id on the same registry is the live instance, not another copy.
    let (again, origin) = second.resume_or_create(Some("call-7"), &store).await;
    assert_eq!(origin, SessionOrigin::Active);
    again.set("turn", json!(2));
    assert_eq!(resumed.get("turn"), Some(json!(2)));

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_auto_refresh_follows_the_other_process() {
    let (_raw, store) = shared_store();
    let writer = SessionRegistry::new(SessionConfig::default());
    let reader = SessionRegistry::new(
        SessionConfig::default().with_auto_refresh(Duration::from_millis(20)),
    );

    let (source, _) = writer.resume_or_create(Some("shared"), &store).await;
    source.set("slot", json!("initial"));
    source.persist(store.as_ref()).await.unwrap();

    let (mirror, origin) = reader.resume_or_create(Some("shared"), &store).await;
    assert_eq!(origin, SessionOrigin::Resumed);
    assert_eq!(mirror.get("slot"), Some(json!("initial")));
    assert!(mirror.auto_refresh_interval().is_some());

    source.set("slot", json!("updated"));
    source.persist(store.as_ref()).await.unwrap();

    let mut synced = false;
    for _ in 0..50 {
        if mirror.get("slot") == Some(json!("updated")) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced, "mirror never picked up the remote write");

    // Removing the session stops its refresh loop.
    let removed = reader.remove_session("shared").await.unwrap();
    assert_eq!(removed.auto_refresh_interval(), None);

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
async fn test_playback_interrupt_then_resume() {
    let (_raw, store) = shared_store();
    let registry = SessionRegistry::new(SessionConfig::default());
    let (session, _) = registry.resume_or_create(None, &store).await;

    session.enqueue_playback(json!({"text": "one"}));
    session.enqueue_playback(json!({"text": "two"}));
    session.set_playback_processing(true);

    assert_eq!(session.interrupt_playback(), 2);
    let status = session.playback_status();
    assert_eq!(status.pending, 0);
    assert!(!status.is_processing);
    assert!(status.media_cancelled);

    session.resume_media();
    assert!(!session.playback_status().media_cancelled);
    assert_eq!(session.next_playback(), None);

    registry.shutdown().await;
}
