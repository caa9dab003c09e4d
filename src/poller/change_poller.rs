//! Change poller: turns newly written session documents into outbound
//! notifications.
//!
//! Each tick walks the live sessions, makes sure each has an outbound
//! thread, and delivers undelivered questions, notifications and command
//! results. Delivery is at-least-once: the handle is written back only
//! after the notifier confirms, and an in-memory per-session set keeps
//! this process from sending the same record twice.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::PollerConfig;
use crate::models::question::QuestionDocument;
use crate::models::session::SessionRecord;
use crate::models::ThreadHandle;
use crate::notifier::{DeliveryTarget, MessageKind, Notifier, OutboundMessage};
use crate::poller::threads::ThreadDirectory;
use crate::poller::trigger::PollTrigger;
use crate::registry::resolver::list_live_sessions;
use crate::store::{SessionDocuments, StorageLayout};

/// Poller timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    /// Period of the fixed tick.
    pub interval: Duration,
    /// Minimum question age before delivery.
    pub question_delay: Duration,
}

impl From<&PollerConfig> for PollerOptions {
    fn from(config: &PollerConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            question_delay: Duration::from_secs(config.question_delay_seconds),
        }
    }
}

/// Counters describing one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick was skipped because another was still running.
    pub skipped: bool,
    /// Live sessions visited.
    pub sessions: usize,
    /// Records delivered.
    pub delivered: usize,
    /// Questions still inside their delay window.
    pub withheld: usize,
    /// Questions dropped because they stopped being pending.
    pub dropped: usize,
    /// Deliveries or thread creations that failed and will be retried.
    pub failed: usize,
}

impl TickReport {
    fn absorb(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.withheld += other.withheld;
        self.dropped += other.dropped;
        self.failed += other.failed;
    }
}

/// Clears the in-flight flag when a tick ends, including on panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type DedupSet = HashSet<String>;

/// Discovers undelivered documents across live sessions.
pub struct ChangePoller {
    layout: StorageLayout,
    notifier: Arc<dyn Notifier>,
    threads: ThreadDirectory,
    options: PollerOptions,
    in_flight: AtomicBool,
    delivered: Mutex<HashMap<String, DedupSet>>,
}

impl ChangePoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        layout: StorageLayout,
        notifier: Arc<dyn Notifier>,
        threads: ThreadDirectory,
        options: PollerOptions,
    ) -> Self {
        Self {
            layout,
            notifier,
            threads,
            options,
            in_flight: AtomicBool::new(false),
            delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Thread directory populated by this poller.
    #[must_use]
    pub fn threads(&self) -> &ThreadDirectory {
        &self.threads
    }

    /// Run one tick. Returns immediately with `skipped` set if a tick is
    /// already in flight.
    pub async fn tick(&self) -> TickReport {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("poll tick skipped; previous tick still running");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        let _in_flight = InFlight(&self.in_flight);

        let sessions = list_live_sessions(&self.layout);
        let mut report = TickReport {
            sessions: sessions.len(),
            ..TickReport::default()
        };

        let live: HashSet<String> = sessions.iter().map(|s| s.session_id.clone()).collect();
        for session in sessions {
            let span = info_span!("poll_session", session_id = %session.session_id);
            let session_report = self.poll_session(session).instrument(span).await;
            report.absorb(session_report);
        }

        self.forget_dead_sessions(&live).await;
        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                withheld = report.withheld,
                "poll tick finished"
            );
        }
        report
    }

    async fn poll_session(&self, session: SessionRecord) -> TickReport {
        let mut report = TickReport::default();
        let documents = match SessionDocuments::new(self.layout.clone(), &session.session_id) {
            Ok(docs) => docs,
            Err(err) => {
                warn!(%err, "skipping session");
                return report;
            }
        };

        let Some(thread) = self.ensure_thread(&session, &documents).await else {
            report.failed += 1;
            return report;
        };

        let mut seen = self
            .delivered
            .lock()
            .await
            .remove(&session.session_id)
            .unwrap_or_default();

        self.deliver_questions(&documents, &thread, &mut seen, &mut report)
            .await;
        self.deliver_notifications(&documents, &thread, &mut seen, &mut report)
            .await;
        self.deliver_command_results(&documents, &thread, &mut seen, &mut report)
            .await;

        self.delivered
            .lock()
            .await
            .insert(session.session_id.clone(), seen);
        report
    }

    /// Existing thread handle, or a newly created one merged into the
    /// session record. `None` when creation failed; retried next tick.
    async fn ensure_thread(
        &self,
        session: &SessionRecord,
        documents: &SessionDocuments,
    ) -> Option<ThreadHandle> {
        if let Some(thread) = session.thread.clone() {
            self.threads
                .register(thread.clone(), &session.session_id)
                .await;
            return Some(thread);
        }

        let mut text = format!("Session started: *{}*", session.project_name);
        if let Some(branch) = &session.git_branch {
            text.push_str(&format!(" on `{branch}`"));
        }
        let message = OutboundMessage::new(
            text,
            MessageKind::SessionThread {
                session_id: session.session_id.clone(),
            },
        );

        let handle = match self.notifier.deliver(DeliveryTarget::Channel, message).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, "failed to create session thread");
                return None;
            }
        };
        let created = ThreadHandle {
            channel_id: handle.channel_id,
            thread_ts: handle.message_ts,
        };

        let thread = match documents.update_meta(|meta| {
            if meta.thread.is_some() {
                return false;
            }
            meta.thread = Some(created.clone());
            true
        }) {
            Ok(Some(meta)) => meta.thread.unwrap_or(created),
            Ok(None) => created,
            Err(err) => {
                warn!(%err, "failed to record session thread");
                created
            }
        };

        self.threads
            .register(thread.clone(), &session.session_id)
            .await;
        info!(thread_ts = %thread.thread_ts, "session thread created");
        Some(thread)
    }

    async fn deliver_questions(
        &self,
        documents: &SessionDocuments,
        thread: &ThreadHandle,
        seen: &mut DedupSet,
        report: &mut TickReport,
    ) {
        let delay = chrono::Duration::from_std(self.options.question_delay)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        for question in documents.questions() {
            let key = dedup_key("question", &question.question_id);
            if seen.contains(&key) {
                continue;
            }
            if question.delivery.is_some() {
                seen.insert(key);
                continue;
            }
            if question.age(Utc::now()) < delay {
                report.withheld += 1;
                continue;
            }

            let current = documents.question(&question.question_id);
            let Some(question) = current.filter(QuestionDocument::is_pending) else {
                debug!(question_id = %question.question_id, "question no longer pending; dropped");
                seen.insert(key);
                report.dropped += 1;
                continue;
            };

            let message = OutboundMessage::new(
                question.text.clone(),
                MessageKind::Question {
                    session_id: question.session_id.clone(),
                    question_id: question.question_id.clone(),
                    options: question.options.clone().unwrap_or_default(),
                },
            );
            match self
                .notifier
                .deliver(DeliveryTarget::Thread(thread.clone()), message)
                .await
            {
                Ok(handle) => {
                    seen.insert(key);
                    report.delivered += 1;
                    if let Err(err) = documents.update_question(&question.question_id, |q| {
                        q.delivery = Some(handle);
                        true
                    }) {
                        warn!(question_id = %question.question_id, %err, "failed to record delivery");
                    }
                }
                Err(err) => {
                    warn!(question_id = %question.question_id, %err, "question delivery failed");
                    report.failed += 1;
                }
            }
        }
    }

    async fn deliver_notifications(
        &self,
        documents: &SessionDocuments,
        thread: &ThreadHandle,
        seen: &mut DedupSet,
        report: &mut TickReport,
    ) {
        for notification in documents.notifications() {
            let key = dedup_key("notification", &notification.notification_id);
            if seen.contains(&key) {
                continue;
            }
            if notification.delivery.is_some() {
                seen.insert(key);
                continue;
            }

            let message = OutboundMessage::new(
                notification.message.clone(),
                MessageKind::Notification(notification.level),
            );
            match self
                .notifier
                .deliver(DeliveryTarget::Thread(thread.clone()), message)
                .await
            {
                Ok(handle) => {
                    seen.insert(key);
                    report.delivered += 1;
                    let id = &notification.notification_id;
                    if let Err(err) = documents.update_notification(id, |n| {
                        n.delivery = Some(handle);
                        true
                    }) {
                        warn!(notification_id = %id, %err, "failed to record delivery");
                    }
                }
                Err(err) => {
                    warn!(notification_id = %notification.notification_id, %err, "notification delivery failed");
                    report.failed += 1;
                }
            }
        }
    }

    async fn deliver_command_results(
        &self,
        documents: &SessionDocuments,
        thread: &ThreadHandle,
        seen: &mut DedupSet,
        report: &mut TickReport,
    ) {
        for result in documents.command_results() {
            let key = dedup_key("command-result", &result.command_id);
            if seen.contains(&key) {
                continue;
            }
            if result.delivery.is_some() {
                seen.insert(key);
                continue;
            }

            let text = documents.command(&result.command_id).map_or_else(
                || result.output.clone(),
                |cmd| format!("`{}`\n{}", cmd.text, result.output),
            );
            let message = OutboundMessage::new(
                text,
                MessageKind::CommandResult {
                    success: result.success,
                },
            );
            match self
                .notifier
                .deliver(DeliveryTarget::Thread(thread.clone()), message)
                .await
            {
                Ok(handle) => {
                    seen.insert(key);
                    report.delivered += 1;
                    if let Err(err) = documents.update_command_result(&result.command_id, |r| {
                        r.delivery = Some(handle);
                        true
                    }) {
                        warn!(command_id = %result.command_id, %err, "failed to record delivery");
                    }
                }
                Err(err) => {
                    warn!(command_id = %result.command_id, %err, "command result delivery failed");
                    report.failed += 1;
                }
            }
        }
    }

    async fn forget_dead_sessions(&self, live: &HashSet<String>) {
        let dead: Vec<String> = {
            let mut delivered = self.delivered.lock().await;
            let dead = delivered
                .keys()
                .filter(|id| !live.contains(*id))
                .cloned()
                .collect::<Vec<_>>();
            for id in &dead {
                delivered.remove(id);
            }
            dead
        };
        for id in dead {
            self.threads.forget_session(&id).await;
        }
    }
}

fn dedup_key(category: &str, id: &str) -> String {
    format!("{category}/{id}")
}

/// Spawn the poll loop: a fixed tick plus early ticks on trigger requests.
#[must_use]
pub fn spawn_change_poller(
    poller: Arc<ChangePoller>,
    trigger: Option<Arc<PollTrigger>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poller.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("change poller shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                () = wait_for_trigger(trigger.as_deref()) => {}
            }
            poller.tick().await;
        }
    })
}

async fn wait_for_trigger(trigger: Option<&PollTrigger>) {
    match trigger {
        Some(trigger) => trigger.notified().await,
        None => std::future::pending().await,
    }
}
