//! Advisory lock file with stale-holder reclamation.
//!
//! The lock is a file created with `create_new` (atomic create-if-absent).
//! A holder that crashed leaves the file behind; once the file's mtime is
//! older than `stale_after` any contender removes it and retries. Scope is
//! a single shared document, not a general distributed lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{AppError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Timing parameters for [`DocumentLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Overall deadline for acquisition.
    pub timeout: Duration,
    /// Age after which an existing lock file is reclaimed.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// A held lock. Released explicitly via [`release`](Self::release) or on drop.
#[derive(Debug)]
pub struct DocumentLock {
    path: PathBuf,
    held: bool,
}

impl DocumentLock {
    /// Acquire the lock at `path`, retrying with backoff until `options.timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` when the deadline passes while another live
    /// holder keeps the lock, or `AppError::Io` on unexpected filesystem errors.
    pub async fn acquire(path: &Path, options: LockOptions) -> Result<Self> {
        let deadline = Instant::now() + options.timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match try_create(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        held: true,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if lock_age(path).is_some_and(|age| age > options.stale_after) {
                        warn!(path = %path.display(), "reclaiming stale lock");
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(err) if err.kind() == ErrorKind::NotFound => continue,
                            Err(err) => {
                                return Err(AppError::Io(format!(
                                    "failed to remove stale lock {}: {err}",
                                    path.display()
                                )))
                            }
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    continue;
                }
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to create lock {}: {err}",
                        path.display()
                    )))
                }
            }

            if Instant::now() + backoff > deadline {
                return Err(AppError::Lock(format!(
                    "timed out after {}ms waiting for {}",
                    options.timeout.as_millis(),
                    path.display()
                )));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock. Releasing an already-removed lock is not an error.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to release lock"),
        }
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let owner = serde_json::json!({
        "pid": std::process::id(),
        "acquired_at": chrono::Utc::now().to_rfc3339(),
    });
    // Owner info is diagnostic only; a failed write still holds the lock.
    let _ = file.write_all(owner.to_string().as_bytes());
    Ok(())
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}
