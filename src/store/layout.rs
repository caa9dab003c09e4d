//! On-disk layout of the storage root.
//!
//! ```text
//! <root>/.current-session
//! <root>/execution-queue.json[.lock]
//! <root>/sessions/<id>/meta.json
//! <root>/sessions/<id>/heartbeat
//! <root>/sessions/<id>/{questions,responses,notifications,commands,command-results}/<rid>.json
//! ```
//!
//! Identifiers are validated before any path is built so that a hostile
//! id can never resolve outside its category directory.

use std::path::{Path, PathBuf};

use crate::{AppError, Result};

const CURRENT_SESSION_FILE: &str = ".current-session";
const QUEUE_FILE: &str = "execution-queue.json";
const QUEUE_LOCK_FILE: &str = "execution-queue.json.lock";
const SESSIONS_DIR: &str = "sessions";
const META_FILE: &str = "meta.json";
const HEARTBEAT_FILE: &str = "heartbeat";

/// Maximum identifier length accepted by [`validate_id`].
const MAX_ID_LEN: usize = 128;

/// Per-session document categories, one directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentCategory {
    /// Questions written by the agent side.
    Questions,
    /// Human answers keyed by question id.
    Responses,
    /// One-way status messages from the agent side.
    Notifications,
    /// Human commands for the agent.
    Commands,
    /// Agent results for commands.
    CommandResults,
}

impl DocumentCategory {
    /// All categories, in directory-creation order.
    pub const ALL: [Self; 5] = [
        Self::Questions,
        Self::Responses,
        Self::Notifications,
        Self::Commands,
        Self::CommandResults,
    ];

    /// Directory name under the session directory.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Questions => "questions",
            Self::Responses => "responses",
            Self::Notifications => "notifications",
            Self::Commands => "commands",
            Self::CommandResults => "command-results",
        }
    }
}

/// Reject identifiers that are empty, too long, or contain anything
/// other than ASCII alphanumerics, `-` and `_` (first char alphanumeric).
///
/// # Errors
///
/// Returns `AppError::PathViolation` for any unsafe identifier.
pub fn validate_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return Err(AppError::PathViolation("identifier is empty".into()));
    };

    if id.len() > MAX_ID_LEN {
        return Err(AppError::PathViolation(format!(
            "identifier exceeds {MAX_ID_LEN} characters"
        )));
    }

    if !first.is_ascii_alphanumeric()
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::PathViolation(format!(
            "identifier contains unsafe characters: {id:?}"
        )));
    }

    Ok(())
}

/// Path builder for everything under the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `root`. Nothing is created on disk.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Global pointer to the most recently created session.
    #[must_use]
    pub fn current_session_path(&self) -> PathBuf {
        self.root.join(CURRENT_SESSION_FILE)
    }

    /// The execution queue document.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.root.join(QUEUE_FILE)
    }

    /// Lock file guarding the execution queue document.
    #[must_use]
    pub fn queue_lock_path(&self) -> PathBuf {
        self.root.join(QUEUE_LOCK_FILE)
    }

    /// Directory holding one subdirectory per session.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    /// Directory for one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if `session_id` is unsafe.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_id(session_id)?;
        Ok(self.sessions_dir().join(session_id))
    }

    /// The session's `meta.json`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if `session_id` is unsafe.
    pub fn meta_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(META_FILE))
    }

    /// The session's heartbeat marker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if `session_id` is unsafe.
    pub fn heartbeat_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(HEARTBEAT_FILE))
    }

    /// Category directory inside a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if `session_id` is unsafe.
    pub fn category_dir(&self, session_id: &str, category: DocumentCategory) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(category.dir_name()))
    }

    /// Path of one record document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if either identifier is unsafe.
    pub fn record_path(
        &self,
        session_id: &str,
        category: DocumentCategory,
        record_id: &str,
    ) -> Result<PathBuf> {
        validate_id(record_id)?;
        Ok(self
            .category_dir(session_id, category)?
            .join(format!("{record_id}.json")))
    }
}
