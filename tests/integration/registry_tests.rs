//! Session lifecycle through `SessionRegistry`, observed on disk.

use std::time::Duration;

use agent_relay::models::session::SessionStatus;
use agent_relay::registry::resolver::{read_pointer, read_session, write_pointer};
use agent_relay::registry::{resolve_session, HeartbeatOptions, SessionRegistry};
use agent_relay::store::{record, StorageLayout};
use tempfile::TempDir;

use super::test_helpers::write_session;

fn registry(dir: &TempDir, interval: Duration, idle_after: Duration) -> SessionRegistry {
    SessionRegistry::new(
        StorageLayout::new(dir.path().join("root")),
        HeartbeatOptions {
            interval,
            idle_after,
        },
    )
}

fn slow_registry(dir: &TempDir) -> SessionRegistry {
    registry(dir, Duration::from_secs(60), Duration::from_secs(60))
}

#[tokio::test]
async fn create_writes_record_heartbeat_and_pointer() {
    let dir = TempDir::new().unwrap();
    let registry = slow_registry(&dir);
    let session = registry.create_session(dir.path()).await.unwrap();
    let layout = registry.layout();

    assert_eq!(session.status, SessionStatus::Active);
    assert!(layout.heartbeat_path(&session.session_id).unwrap().exists());
    assert_eq!(
        read_session(layout, &session.session_id).unwrap().session_id,
        session.session_id
    );
    assert_eq!(read_pointer(layout).unwrap().session_id, session.session_id);
    assert!(layout
        .session_dir(&session.session_id)
        .unwrap()
        .join("questions")
        .is_dir());

    registry.terminate_session("test over").await;
}

#[tokio::test]
async fn second_create_supersedes_the_first() {
    let dir = TempDir::new().unwrap();
    let registry = slow_registry(&dir);
    let first = registry.create_session(dir.path()).await.unwrap();
    let second = registry.create_session(dir.path()).await.unwrap();
    let layout = registry.layout();

    assert_ne!(first.session_id, second.session_id);
    let old = read_session(layout, &first.session_id).unwrap();
    assert_eq!(old.status, SessionStatus::Terminated);
    assert_eq!(
        old.termination_reason.as_deref(),
        Some("superseded by a new session")
    );
    assert_eq!(read_pointer(layout).unwrap().session_id, second.session_id);
    assert_eq!(resolve_session(layout).unwrap().session_id, second.session_id);

    registry.terminate_session("test over").await;
}

#[tokio::test]
async fn pointer_held_by_another_live_session_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let registry = slow_registry(&dir);
    let layout = registry.layout().clone();
    let other = write_session(&layout, "other-live", 0);
    write_pointer(&layout, &other).unwrap();

    let mine = registry.create_session(dir.path()).await.unwrap();
    assert_ne!(mine.session_id, other.session_id);
    assert_eq!(read_pointer(&layout).unwrap().session_id, "other-live");

    registry.terminate_session("test over").await;
    assert_eq!(read_pointer(&layout).unwrap().session_id, "other-live");
}

#[tokio::test]
async fn terminate_clears_own_pointer() {
    let dir = TempDir::new().unwrap();
    let registry = slow_registry(&dir);
    let session = registry.create_session(dir.path()).await.unwrap();

    let ended = registry.terminate_session("agent exited").await.unwrap();
    assert_eq!(ended.status, SessionStatus::Terminated);
    assert!(ended.terminated_at.is_some());
    assert!(read_pointer(registry.layout()).is_none());
    assert!(registry.session().await.is_none());
    assert!(resolve_session(registry.layout()).is_none());
    assert!(registry.terminate_session("again").await.is_none());
    assert_eq!(
        read_session(registry.layout(), &session.session_id)
            .unwrap()
            .termination_reason
            .as_deref(),
        Some("agent exited")
    );
}

#[tokio::test]
async fn waiting_status_is_persisted_immediately() {
    let dir = TempDir::new().unwrap();
    let registry = slow_registry(&dir);
    let session = registry.create_session(dir.path()).await.unwrap();

    registry.set_status(SessionStatus::Waiting).await.unwrap();
    assert_eq!(
        read_session(registry.layout(), &session.session_id)
            .unwrap()
            .status,
        SessionStatus::Waiting
    );
    assert!(registry.set_status(SessionStatus::Terminated).await.is_err());

    registry.terminate_session("test over").await;
}

#[tokio::test]
async fn heartbeat_refreshes_liveness_and_reports_idle() {
    let dir = TempDir::new().unwrap();
    let registry = registry(&dir, Duration::from_millis(50), Duration::from_millis(10));
    let session = registry.create_session(dir.path()).await.unwrap();
    let heartbeat = registry.layout().heartbeat_path(&session.session_id).unwrap();
    let first_touch = record::modified_at(&heartbeat).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let current = read_session(registry.layout(), &session.session_id).unwrap();
    assert!(current.last_active_at > session.last_active_at);
    assert_eq!(current.status, SessionStatus::Idle);
    assert!(record::modified_at(&heartbeat).unwrap() >= first_touch);

    registry.terminate_session("test over").await;
}
