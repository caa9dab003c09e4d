//! Document schemas exchanged through the storage root.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod command;
pub mod job;
pub mod notification;
pub mod question;
pub mod session;

/// Generate a time-ordered record identifier (`UUIDv7`).
///
/// Ids sort roughly by creation time, but ordering decisions always use
/// the recorded timestamps.
#[must_use]
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Outbound thread a session's messages are posted into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct ThreadHandle {
    /// Channel containing the thread.
    pub channel_id: String,
    /// Timestamp of the thread's root message.
    pub thread_ts: String,
}

/// Confirmation of a delivered outbound message; doubles as the
/// persisted dedup marker on the delivered document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryHandle {
    /// Channel the message was posted to.
    pub channel_id: String,
    /// Timestamp identifying the posted message.
    pub message_ts: String,
}
