use std::path::PathBuf;

use agent_relay::store::{validate_id, DocumentCategory, StorageLayout};
use agent_relay::AppError;

#[test]
fn accepts_uuid_like_ids() {
    assert!(validate_id("0190f5c2-7a1b-7c3d-8e4f-123456789abc").is_ok());
    assert!(validate_id("job_1").is_ok());
}

#[test]
fn rejects_traversal_and_separators() {
    for id in ["..", "../etc", "a/b", "a\\b", ".hidden", "-lead", ""] {
        assert!(
            matches!(validate_id(id), Err(AppError::PathViolation(_))),
            "{id:?} must be rejected"
        );
    }
}

#[test]
fn rejects_overlong_ids() {
    let id = "a".repeat(129);
    assert!(validate_id(&id).is_err());
    assert!(validate_id(&"a".repeat(128)).is_ok());
}

#[test]
fn builds_documented_paths() {
    let layout = StorageLayout::new("/srv/relay");
    assert_eq!(
        layout.current_session_path(),
        PathBuf::from("/srv/relay/.current-session")
    );
    assert_eq!(
        layout.meta_path("s1").unwrap(),
        PathBuf::from("/srv/relay/sessions/s1/meta.json")
    );
    assert_eq!(
        layout.heartbeat_path("s1").unwrap(),
        PathBuf::from("/srv/relay/sessions/s1/heartbeat")
    );
    assert_eq!(
        layout
            .category_dir("s1", DocumentCategory::CommandResults)
            .unwrap(),
        PathBuf::from("/srv/relay/sessions/s1/command-results")
    );
}

#[test]
fn hostile_ids_never_produce_paths() {
    let layout = StorageLayout::new("/srv/relay");
    assert!(layout.session_dir("../../etc").is_err());
    assert!(layout
        .record_path("s1", DocumentCategory::Questions, "../x")
        .is_err());
}
