//! Question and response documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_record_id, DeliveryHandle};

/// Lifecycle status for a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Awaiting a human response.
    Pending,
    /// A response document was recorded.
    Answered,
    /// The asking side stopped waiting.
    Expired,
}

/// A question the agent asks a human, persisted under `questions/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QuestionDocument {
    /// Unique record identifier.
    pub question_id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Question text.
    pub text: String,
    /// Suggested answers rendered as buttons.
    #[serde(default)]
    pub options: Option<Vec<String>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// How long the asking side is willing to wait.
    pub timeout_seconds: u64,
    /// Current lifecycle status.
    pub status: QuestionStatus,
    /// Set once the question was posted outbound.
    #[serde(default)]
    pub delivery: Option<DeliveryHandle>,
    /// When the question left `Pending`.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl QuestionDocument {
    /// Construct a new pending question.
    #[must_use]
    pub fn new(
        session_id: String,
        text: String,
        options: Option<Vec<String>>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            question_id: new_record_id(),
            session_id,
            text,
            options: options.filter(|opts| !opts.is_empty()),
            created_at: Utc::now(),
            timeout_seconds,
            status: QuestionStatus::Pending,
            delivery: None,
            resolved_at: None,
        }
    }

    /// Whether the question still awaits a response.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == QuestionStatus::Pending
    }

    /// Only `Pending` may move, and only to a terminal status.
    #[must_use]
    pub fn can_transition_to(&self, next: QuestionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                QuestionStatus::Pending,
                QuestionStatus::Answered | QuestionStatus::Expired
            )
        )
    }

    /// Apply a terminal transition. Returns `false` if not permitted.
    pub fn resolve(&mut self, next: QuestionStatus, now: DateTime<Utc>) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.resolved_at = Some(now);
        true
    }

    /// Age of the question at `now`; zero if the writer's clock ran ahead.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }
}

/// A human answer, persisted under `responses/<question_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResponseDocument {
    /// Question being answered (also the record id).
    pub question_id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Answer text.
    pub answer: String,
    /// Who answered (Slack user id or local user).
    #[serde(default)]
    pub responder: Option<String>,
    /// Channel the answer came through (`slack`, `ctl`, ...).
    pub source: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ResponseDocument {
    /// Construct a response for `question`.
    #[must_use]
    pub fn new(
        question: &QuestionDocument,
        answer: String,
        responder: Option<String>,
        source: &str,
    ) -> Self {
        Self {
            question_id: question.question_id.clone(),
            session_id: question.session_id.clone(),
            answer,
            responder,
            source: source.to_owned(),
            created_at: Utc::now(),
        }
    }
}
