//! Thread-to-session correlation for inbound replies.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::ThreadHandle;

/// Maps outbound thread handles to the session that owns them.
///
/// Populated by the poller when it creates or discovers a thread; read by
/// the Slack event handlers to route thread replies.
#[derive(Debug, Clone, Default)]
pub struct ThreadDirectory {
    inner: Arc<RwLock<HashMap<ThreadHandle, String>>>,
}

impl ThreadDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `thread` belongs to `session_id`.
    pub async fn register(&self, thread: ThreadHandle, session_id: &str) {
        self.inner
            .write()
            .await
            .insert(thread, session_id.to_owned());
    }

    /// Session owning the thread rooted at `thread_ts` in `channel_id`.
    pub async fn session_for(&self, channel_id: &str, thread_ts: &str) -> Option<String> {
        let key = ThreadHandle {
            channel_id: channel_id.to_owned(),
            thread_ts: thread_ts.to_owned(),
        };
        self.inner.read().await.get(&key).cloned()
    }

    /// Drop every thread owned by `session_id`.
    pub async fn forget_session(&self, session_id: &str) {
        self.inner.write().await.retain(|_, owner| owner != session_id);
    }

    /// Number of registered threads.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no thread is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
