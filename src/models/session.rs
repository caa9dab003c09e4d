//! Session record, current-session pointer, and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ThreadHandle;

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Agent is working and calling tools.
    Active,
    /// No tool activity for a while, heartbeat still alive.
    Idle,
    /// Agent is blocked on a human response.
    Waiting,
    /// Session ended; no transition leaves this state.
    Terminated,
}

impl SessionStatus {
    /// Every status other than `Terminated`.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

/// Where the owning agent process runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EnvironmentInfo {
    /// Owning process id.
    pub pid: u32,
    /// Operating system family (`linux`, `macos`, ...).
    pub os: String,
    /// Terminal program, if detectable.
    pub terminal: Option<String>,
    /// Login user, if detectable.
    pub user: Option<String>,
}

/// Session metadata persisted as `sessions/<id>/meta.json`.
///
/// The registry owns `status` and `last_active_at`; the bot side owns
/// `thread`. Fields written by other tools are kept in `extra` so a
/// read-merge-write never drops them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Unique session identifier.
    pub session_id: String,
    /// Environment of the owning process.
    pub environment: EnvironmentInfo,
    /// Absolute project directory.
    pub project_path: PathBuf,
    /// Display name of the project (last path component).
    pub project_name: String,
    /// Git branch at session creation, if any.
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last liveness timestamp written by the owning process.
    pub last_active_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Outbound thread, created lazily by the poller.
    #[serde(default)]
    pub thread: Option<ThreadHandle>,
    /// When the session was terminated.
    #[serde(default)]
    pub terminated_at: Option<DateTime<Utc>>,
    /// Why the session was terminated.
    #[serde(default)]
    pub termination_reason: Option<String>,
    /// Fields this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionRecord {
    /// Construct a new active session record.
    #[must_use]
    pub fn new(
        session_id: String,
        environment: EnvironmentInfo,
        project_path: PathBuf,
        git_branch: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let project_name = project_path.file_name().map_or_else(
            || project_path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        Self {
            session_id,
            environment,
            project_path,
            project_name,
            git_branch,
            created_at: now,
            last_active_at: now,
            status: SessionStatus::Active,
            thread: None,
            terminated_at: None,
            termination_reason: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the session is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        !matches!((self.status, next), (SessionStatus::Terminated, _))
    }

    /// Record liveness. `last_active_at` never moves backwards and a
    /// terminated session is left untouched.
    pub fn touch(&mut self, now: DateTime<Utc>, status: SessionStatus) {
        if !self.can_transition_to(status) {
            return;
        }
        if now > self.last_active_at {
            self.last_active_at = now;
        }
        self.status = status;
    }

    /// Move to `Terminated`. Returns `false` if already terminated.
    pub fn terminate(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if !self.is_live() {
            return false;
        }
        self.status = SessionStatus::Terminated;
        self.terminated_at = Some(now);
        self.termination_reason = Some(reason.to_owned());
        true
    }

    /// Timestamp used for "most recent" comparisons.
    #[must_use]
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_active_at.max(self.created_at)
    }
}

/// Global hint naming the most recently created session.
///
/// Readers must verify the named session before trusting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CurrentSessionPointer {
    /// Session named by the pointer.
    pub session_id: String,
    /// Process that created the session.
    pub pid: u32,
    /// Session directory.
    pub session_path: PathBuf,
    /// When the pointer was written.
    pub updated_at: DateTime<Utc>,
}
