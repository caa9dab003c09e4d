//! Session creation, heartbeat, and termination for the owning process.
//!
//! The registry is the only writer that creates or terminates a
//! [`SessionRecord`]. Other processes attach fields to the same record
//! (the poller writes the thread handle), so every update here is a
//! read-merge-write through [`SessionDocuments::update_meta`].

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::HeartbeatConfig;
use crate::models::new_record_id;
use crate::models::session::{SessionRecord, SessionStatus};
use crate::registry::environment::{detect_environment, detect_git_branch};
use crate::registry::resolver::{clear_pointer_if, pointer_is_valid, read_pointer, write_pointer};
use crate::store::{record, DocumentCategory, SessionDocuments, StorageLayout};
use crate::{AppError, Result};

/// Heartbeat timing for an owned session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOptions {
    /// Period between heartbeat touches.
    pub interval: Duration,
    /// Tool inactivity after which the session is reported `idle`.
    pub idle_after: Duration,
}

impl From<&HeartbeatConfig> for HeartbeatOptions {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds),
            idle_after: Duration::from_secs(config.idle_after_seconds),
        }
    }
}

#[derive(Debug)]
struct Liveness {
    last_activity: Instant,
    waiting: bool,
}

impl Liveness {
    fn status(&self, idle_after: Duration) -> SessionStatus {
        if self.waiting {
            SessionStatus::Waiting
        } else if self.last_activity.elapsed() >= idle_after {
            SessionStatus::Idle
        } else {
            SessionStatus::Active
        }
    }
}

struct OwnedSession {
    record: SessionRecord,
    documents: SessionDocuments,
    liveness: Arc<Mutex<Liveness>>,
    cancel: CancellationToken,
    heartbeat: JoinHandle<()>,
}

/// Creates and owns at most one session at a time for this process.
pub struct SessionRegistry {
    layout: StorageLayout,
    options: HeartbeatOptions,
    owned: Mutex<Option<OwnedSession>>,
}

impl SessionRegistry {
    /// Create a registry rooted at `layout`.
    #[must_use]
    pub fn new(layout: StorageLayout, options: HeartbeatOptions) -> Self {
        Self {
            layout,
            options,
            owned: Mutex::new(None),
        }
    }

    /// Storage layout this registry writes under.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Create a new session for `project_path`, terminating any session
    /// this process already owns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the session directory or initial
    /// documents cannot be written.
    pub async fn create_session(&self, project_path: &Path) -> Result<SessionRecord> {
        let mut owned = self.owned.lock().await;
        if let Some(previous) = owned.take() {
            self.shutdown_owned(previous, "superseded by a new session")
                .await;
        }

        let session_id = new_record_id();
        let span = info_span!("create_session", session_id = %session_id);

        async {
            let project_path = std::path::absolute(project_path).map_err(|err| {
                AppError::Io(format!("cannot resolve {}: {err}", project_path.display()))
            })?;
            let git_branch = detect_git_branch(&project_path).await;
            let record = SessionRecord::new(
                session_id.clone(),
                detect_environment(),
                project_path,
                git_branch,
            );

            for category in DocumentCategory::ALL {
                fs::create_dir_all(self.layout.category_dir(&session_id, category)?)?;
            }
            let documents = SessionDocuments::new(self.layout.clone(), &session_id)?;
            documents.write_meta(&record)?;
            record::touch(&self.layout.heartbeat_path(&session_id)?)?;

            let claim = match read_pointer(&self.layout) {
                None => true,
                Some(pointer) => {
                    pointer.session_id == session_id || !pointer_is_valid(&self.layout, &pointer)
                }
            };
            if claim {
                write_pointer(&self.layout, &record)?;
            } else {
                info!("current-session pointer names another live session; leaving it");
            }

            let liveness = Arc::new(Mutex::new(Liveness {
                last_activity: Instant::now(),
                waiting: false,
            }));
            let cancel = CancellationToken::new();
            let heartbeat = spawn_heartbeat(
                self.layout.clone(),
                documents.clone(),
                Arc::clone(&liveness),
                self.options,
                cancel.clone(),
            );

            info!(project = %record.project_name, "session created");
            *owned = Some(OwnedSession {
                record: record.clone(),
                documents,
                liveness,
                cancel,
                heartbeat,
            });
            Ok::<_, AppError>(record)
        }
        .instrument(span)
        .await
    }

    /// Terminate the owned session, if any, and return its final record.
    ///
    /// Write failures are logged; the in-memory session is released either way.
    pub async fn terminate_session(&self, reason: &str) -> Option<SessionRecord> {
        let owned = self.owned.lock().await.take()?;
        Some(self.shutdown_owned(owned, reason).await)
    }

    /// In-memory snapshot of the owned session.
    pub async fn session(&self) -> Option<SessionRecord> {
        self.owned.lock().await.as_ref().map(|o| o.record.clone())
    }

    /// Document accessors for the owned session.
    pub async fn documents(&self) -> Option<SessionDocuments> {
        self.owned.lock().await.as_ref().map(|o| o.documents.clone())
    }

    /// Note tool activity; the next heartbeat reports `active`.
    pub async fn record_activity(&self) {
        if let Some(owned) = self.owned.lock().await.as_ref() {
            owned.liveness.lock().await.last_activity = Instant::now();
        }
    }

    /// Set `waiting` or `active` immediately and persist it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when no session is owned,
    /// `AppError::InvalidTransition` for `terminated` (use
    /// [`terminate_session`](Self::terminate_session)), or `AppError::Io`.
    pub async fn set_status(&self, status: SessionStatus) -> Result<()> {
        if status == SessionStatus::Terminated {
            return Err(AppError::InvalidTransition(
                "use terminate_session to end a session".into(),
            ));
        }

        let mut guard = self.owned.lock().await;
        let owned = guard
            .as_mut()
            .ok_or_else(|| AppError::NotFound("no session owned by this process".into()))?;

        {
            let mut liveness = owned.liveness.lock().await;
            liveness.waiting = status == SessionStatus::Waiting;
            liveness.last_activity = Instant::now();
        }

        let now = Utc::now();
        if let Some(updated) = owned.documents.update_meta(|meta| {
            if !meta.is_live() {
                return false;
            }
            meta.touch(now, status);
            true
        })? {
            owned.record = updated;
        }
        Ok(())
    }

    async fn shutdown_owned(&self, owned: OwnedSession, reason: &str) -> SessionRecord {
        let OwnedSession {
            mut record,
            documents,
            cancel,
            heartbeat,
            ..
        } = owned;
        let session_id = record.session_id.clone();

        cancel.cancel();
        if let Err(err) = heartbeat.await {
            warn!(session_id, %err, "heartbeat task ended abnormally");
        }

        let now = Utc::now();
        match documents.update_meta(|meta| meta.terminate(reason, now)) {
            Ok(Some(updated)) => record = updated,
            Ok(None) => {
                warn!(session_id, "session record vanished before termination");
                record.terminate(reason, now);
            }
            Err(err) => {
                warn!(session_id, %err, "failed to persist session termination");
                record.terminate(reason, now);
            }
        }

        clear_pointer_if(&self.layout, &session_id);
        info!(session_id, reason, "session terminated");
        record
    }
}

/// Touch the heartbeat file and refresh `last_active_at`/`status` on every
/// tick until cancelled or the record is terminated by another process.
fn spawn_heartbeat(
    layout: StorageLayout,
    documents: SessionDocuments,
    liveness: Arc<Mutex<Liveness>>,
    options: HeartbeatOptions,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let session_id = documents.session_id().to_owned();
    tokio::spawn(async move {
        let Ok(heartbeat_path) = layout.heartbeat_path(&session_id) else {
            return;
        };
        let mut interval = tokio::time::interval(options.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let status = liveness.lock().await.status(options.idle_after);
            let now = Utc::now();
            match documents.update_meta(|meta| {
                if !meta.is_live() {
                    return false;
                }
                meta.touch(now, status);
                true
            }) {
                Ok(Some(meta)) if !meta.is_live() => {
                    warn!(session_id, "session terminated externally; stopping heartbeat");
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => warn!(session_id, "session record missing during heartbeat"),
                Err(err) => warn!(session_id, %err, "failed to refresh session record"),
            }

            if let Err(err) = record::touch(&heartbeat_path) {
                warn!(session_id, %err, "failed to touch heartbeat");
            }
        }
    })
}
