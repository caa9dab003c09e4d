//! Outbound notifier abstraction.
//!
//! The [`Notifier`] trait decouples the poller, the staleness sweep and the
//! job supervisor from the chat platform. Delivery is best-effort: callers
//! log failures and retry on their next pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::models::notification::NotificationLevel;
use crate::models::{DeliveryHandle, ThreadHandle};
use crate::Result;

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Top level of the notifier's configured channel.
    Channel,
    /// Reply inside an existing thread.
    Thread(ThreadHandle),
}

impl DeliveryTarget {
    /// Thread target when a handle exists, channel otherwise.
    #[must_use]
    pub fn from_thread(thread: Option<&ThreadHandle>) -> Self {
        thread.map_or(Self::Channel, |t| Self::Thread(t.clone()))
    }
}

/// What an outbound message represents; renderers pick a layout from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Root message of a session thread.
    SessionThread {
        /// Session the thread belongs to.
        session_id: String,
    },
    /// A question with optional answer buttons.
    Question {
        /// Session the question belongs to.
        session_id: String,
        /// Question id encoded in button values.
        question_id: String,
        /// Suggested answers.
        options: Vec<String>,
    },
    /// The question was answered; buttons are removed.
    QuestionAnswered,
    /// A one-way status message.
    Notification(NotificationLevel),
    /// A command result reported by the agent.
    CommandResult {
        /// Whether the command succeeded.
        success: bool,
    },
    /// Anything else (job notices, staleness notices).
    Plain,
}

/// Platform-neutral outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Fallback text; every renderer shows at least this.
    pub text: String,
    /// Layout hint.
    pub kind: MessageKind,
}

impl OutboundMessage {
    /// Plain text message.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Plain,
        }
    }

    /// Message with an explicit layout hint.
    #[must_use]
    pub fn new(text: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Boxed future returned by [`Notifier`] methods.
pub type NotifyFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Opaque best-effort outbound channel.
pub trait Notifier: Send + Sync {
    /// Post a message and return a handle identifying it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) (or another
    /// variant for other platforms) if the message was not accepted.
    fn deliver(&self, target: DeliveryTarget, message: OutboundMessage)
        -> NotifyFuture<'_, DeliveryHandle>;

    /// Replace a previously delivered message.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the update.
    fn update(&self, handle: DeliveryHandle, message: OutboundMessage) -> NotifyFuture<'_, ()>;
}

/// Notifier used when no chat platform is configured. Messages go to the
/// log and receive synthetic handles.
#[derive(Debug, Default)]
pub struct LocalNotifier {
    counter: AtomicU64,
}

impl LocalNotifier {
    /// Channel id reported in synthetic handles.
    pub const CHANNEL: &'static str = "local";

    /// Create a local notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for LocalNotifier {
    fn deliver(
        &self,
        target: DeliveryTarget,
        message: OutboundMessage,
    ) -> NotifyFuture<'_, DeliveryHandle> {
        Box::pin(async move {
            let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            let thread = match &target {
                DeliveryTarget::Channel => None,
                DeliveryTarget::Thread(t) => Some(t.thread_ts.as_str()),
            };
            info!(seq, thread, kind = ?message.kind, text = %message.text, "local delivery");
            Ok(DeliveryHandle {
                channel_id: Self::CHANNEL.to_owned(),
                message_ts: format!("local-{seq}"),
            })
        })
    }

    fn update(&self, handle: DeliveryHandle, message: OutboundMessage) -> NotifyFuture<'_, ()> {
        Box::pin(async move {
            info!(message_ts = %handle.message_ts, text = %message.text, "local update");
            Ok(())
        })
    }
}
