//! Shared helpers for integration tests.
//!
//! Builds configs rooted in a temp directory, session records with a
//! chosen age, and a notifier that records what it was asked to send.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::config::GlobalConfig;
use agent_relay::models::session::{EnvironmentInfo, SessionRecord};
use agent_relay::models::{DeliveryHandle, ThreadHandle};
use agent_relay::notifier::{DeliveryTarget, Notifier, NotifyFuture, OutboundMessage};
use agent_relay::store::{SessionDocuments, StorageLayout};
use agent_relay::AppError;

/// Build a `GlobalConfig` rooted at `root` with short timings.
pub fn test_config(root: &Path) -> GlobalConfig {
    let toml = format!(
        r#"
storage_root = '{root}'
authorized_user_ids = ["U_OK"]

[agent]
host_cli = "sh"
host_cli_args = ["-c"]

[queue]
max_queue_size = 5
max_concurrency = 1
lock_timeout_ms = 2000

[poller]
interval_ms = 50
question_delay_seconds = 0

[timeouts]
response_seconds = 2
command_wait_seconds = 0
poll_interval_ms = 20
"#,
        root = root.display()
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Write a live session record whose `last_active_at` is `age_secs` old.
pub fn write_session(layout: &StorageLayout, session_id: &str, age_secs: i64) -> SessionRecord {
    let mut record = SessionRecord::new(
        session_id.to_owned(),
        EnvironmentInfo {
            pid: std::process::id(),
            os: "linux".into(),
            terminal: None,
            user: Some("tester".into()),
        },
        PathBuf::from("/work/demo"),
        Some("main".into()),
    );
    record.created_at -= chrono::Duration::seconds(age_secs);
    record.last_active_at = record.created_at;
    SessionDocuments::new(layout.clone(), session_id)
        .expect("valid session id")
        .write_meta(&record)
        .expect("write session record");
    record
}

/// Session documents for `session_id`.
pub fn documents(layout: &StorageLayout, session_id: &str) -> SessionDocuments {
    SessionDocuments::new(layout.clone(), session_id).expect("valid session id")
}

/// Notifier that records deliveries and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(DeliveryTarget, OutboundMessage)>>,
    updated: Mutex<Vec<(DeliveryHandle, OutboundMessage)>>,
    failing: AtomicBool,
    counter: AtomicU64,
    delay_ms: AtomicU64,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every delivery for `delay` before recording it.
    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(DeliveryTarget, OutboundMessage)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Texts delivered into `thread`.
    pub fn thread_texts(&self, thread: &ThreadHandle) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter(|(target, _)| *target == DeliveryTarget::Thread(thread.clone()))
            .map(|(_, message)| message.text)
            .collect()
    }

    pub fn updates(&self) -> Vec<(DeliveryHandle, OutboundMessage)> {
        self.updated.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(
        &self,
        target: DeliveryTarget,
        message: OutboundMessage,
    ) -> NotifyFuture<'_, DeliveryHandle> {
        Box::pin(async move {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::Slack("simulated outage".into()));
            }
            let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.delivered.lock().unwrap().push((target, message));
            Ok(DeliveryHandle {
                channel_id: "C_TEST".into(),
                message_ts: format!("{seq}.000100"),
            })
        })
    }

    fn update(&self, handle: DeliveryHandle, message: OutboundMessage) -> NotifyFuture<'_, ()> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::Slack("simulated outage".into()));
            }
            self.updated.lock().unwrap().push((handle, message));
            Ok(())
        })
    }
}
