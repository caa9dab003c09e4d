//! Session discovery for processes that know only the storage root.
//!
//! The current-session pointer is a fast-path hint. It can name a session
//! that crashed before writing its record or that was terminated
//! elsewhere, so every lookup verifies the record and falls back to a
//! full scan of `sessions/`.

use chrono::Utc;
use tracing::debug;

use crate::models::session::{CurrentSessionPointer, SessionRecord};
use crate::store::{record, validate_id, StorageLayout};
use crate::Result;

/// Read the pointer document, if present and parsable.
#[must_use]
pub fn read_pointer(layout: &StorageLayout) -> Option<CurrentSessionPointer> {
    record::read_json(&layout.current_session_path())
}

/// Point `.current-session` at `session`.
///
/// # Errors
///
/// Returns `AppError::Io` if the write fails.
pub fn write_pointer(layout: &StorageLayout, session: &SessionRecord) -> Result<()> {
    let pointer = CurrentSessionPointer {
        session_id: session.session_id.clone(),
        pid: session.environment.pid,
        session_path: layout.session_dir(&session.session_id)?,
        updated_at: Utc::now(),
    };
    record::write_json(&layout.current_session_path(), &pointer)
}

/// Remove the pointer only if it currently names `session_id`.
///
/// Returns `true` if the pointer was removed.
pub fn clear_pointer_if(layout: &StorageLayout, session_id: &str) -> bool {
    match read_pointer(layout) {
        Some(pointer) if pointer.session_id == session_id => {
            record::remove_quietly(&layout.current_session_path())
        }
        _ => false,
    }
}

/// Read one session record by id. Unsafe ids and unreadable records yield
/// `None`.
#[must_use]
pub fn read_session(layout: &StorageLayout, session_id: &str) -> Option<SessionRecord> {
    let path = layout.meta_path(session_id).ok()?;
    record::read_json::<SessionRecord>(&path).filter(|rec| rec.session_id == session_id)
}

/// Whether the pointer names a session that exists and is not terminated.
#[must_use]
pub fn pointer_is_valid(layout: &StorageLayout, pointer: &CurrentSessionPointer) -> bool {
    read_session(layout, &pointer.session_id).is_some_and(|rec| rec.is_live())
}

/// Every parsable session record under `sessions/`, in directory order.
#[must_use]
pub fn list_sessions(layout: &StorageLayout) -> Vec<SessionRecord> {
    record::list_subdirectories(&layout.sessions_dir())
        .into_iter()
        .filter(|id| validate_id(id).is_ok())
        .filter_map(|id| read_session(layout, &id))
        .collect()
}

/// Non-terminated sessions, most recently active first.
#[must_use]
pub fn list_live_sessions(layout: &StorageLayout) -> Vec<SessionRecord> {
    let mut live: Vec<SessionRecord> = list_sessions(layout)
        .into_iter()
        .filter(SessionRecord::is_live)
        .collect();
    live.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    live
}

/// Find the live session: the pointer's target when it checks out,
/// otherwise the most recently active non-terminated session.
#[must_use]
pub fn resolve_session(layout: &StorageLayout) -> Option<SessionRecord> {
    if let Some(pointer) = read_pointer(layout) {
        match read_session(layout, &pointer.session_id) {
            Some(rec) if rec.is_live() => return Some(rec),
            Some(_) => debug!(session_id = %pointer.session_id, "pointer names a terminated session"),
            None => debug!(session_id = %pointer.session_id, "pointer names a missing session"),
        }
    }

    list_live_sessions(layout).into_iter().next()
}
