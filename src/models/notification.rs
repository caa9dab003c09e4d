//! One-way notification documents written by the agent side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_record_id, DeliveryHandle};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Informational message.
    #[default]
    Info,
    /// Successful completion.
    Success,
    /// Warning condition.
    Warning,
    /// Error condition.
    Error,
}

impl NotificationLevel {
    /// Short label used by outbound renderers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A status message for the human, persisted under `notifications/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationDocument {
    /// Unique record identifier.
    pub notification_id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Message text.
    pub message: String,
    /// Severity.
    #[serde(default)]
    pub level: NotificationLevel,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set once delivered outbound.
    #[serde(default)]
    pub delivery: Option<DeliveryHandle>,
}

impl NotificationDocument {
    /// Construct a new undelivered notification.
    #[must_use]
    pub fn new(session_id: String, message: String, level: NotificationLevel) -> Self {
        Self {
            notification_id: new_record_id(),
            session_id,
            message,
            level,
            created_at: Utc::now(),
            delivery: None,
        }
    }
}
