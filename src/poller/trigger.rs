//! File-watch trigger that requests an early poll tick.
//!
//! Watch events are only a hint: they wake the poller sooner, and the
//! periodic tick stays the source of truth. Requests inside the cooldown
//! window after the last accepted one are ignored.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::store::StorageLayout;
use crate::{AppError, Result};

const NEVER: u64 = u64::MAX;

/// Debounced wake-up signal for the change poller.
#[derive(Debug)]
pub struct PollTrigger {
    notify: Notify,
    cooldown: Duration,
    origin: Instant,
    last_ms: AtomicU64,
}

impl PollTrigger {
    /// Create a trigger that accepts at most one request per `cooldown`.
    #[must_use]
    pub fn new(cooldown: Duration) -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
            cooldown,
            origin: Instant::now(),
            last_ms: AtomicU64::new(NEVER),
        })
    }

    /// Request an early tick. Returns `false` if the request fell inside
    /// the cooldown window and was dropped.
    pub fn request(&self) -> bool {
        let now_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(NEVER - 1);
        let cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(NEVER);
        let last = self.last_ms.load(Ordering::Acquire);

        if last != NEVER && now_ms.saturating_sub(last) < cooldown_ms {
            return false;
        }
        if self
            .last_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next accepted request.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Watch `<root>/sessions` recursively and feed file events into `trigger`.
///
/// The returned watcher must be kept alive for events to flow.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created or watched.
pub fn watch_sessions(
    layout: &StorageLayout,
    trigger: Arc<PollTrigger>,
) -> Result<RecommendedWatcher> {
    let dir = layout.sessions_dir();
    fs::create_dir_all(&dir)?;

    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if is_document_event(&event) => {
                if trigger.request() {
                    debug!(paths = ?event.paths, "file change triggered early poll");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "file watcher error"),
        },
    )
    .map_err(|err| AppError::Io(format!("failed to create watcher: {err}")))?;

    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .map_err(|err| AppError::Io(format!("failed to watch {}: {err}", dir.display())))?;
    info!(dir = %dir.display(), "watching session documents");
    Ok(watcher)
}

fn is_document_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "json"))
}
