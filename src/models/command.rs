//! Human commands for the agent and the agent's results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_record_id, DeliveryHandle};

/// Lifecycle status for a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Written by the human side, not yet picked up.
    Pending,
    /// Returned to the agent by `check_commands`.
    Acknowledged,
    /// The agent reported a result.
    Completed,
}

/// A human instruction for the agent, persisted under `commands/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandDocument {
    /// Unique record identifier.
    pub command_id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Instruction text.
    pub text: String,
    /// Who issued the command.
    pub requested_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: CommandStatus,
    /// When the agent picked the command up.
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Inbound message the command was posted as, if any.
    #[serde(default)]
    pub posted: Option<DeliveryHandle>,
}

impl CommandDocument {
    /// Construct a new pending command.
    #[must_use]
    pub fn new(session_id: String, text: String, requested_by: String) -> Self {
        Self {
            command_id: new_record_id(),
            session_id,
            text,
            requested_by,
            created_at: Utc::now(),
            status: CommandStatus::Pending,
            acknowledged_at: None,
            posted: None,
        }
    }
}

/// Result of a command, persisted under `command-results/<command_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandResultDocument {
    /// Command this result belongs to (also the record id).
    pub command_id: String,
    /// Owning session identifier.
    pub session_id: String,
    /// Output reported by the agent.
    pub output: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set once delivered outbound.
    #[serde(default)]
    pub delivery: Option<DeliveryHandle>,
}

impl CommandResultDocument {
    /// Construct a new undelivered result.
    #[must_use]
    pub fn new(session_id: String, command_id: String, output: String, success: bool) -> Self {
        Self {
            command_id,
            session_id,
            output,
            success,
            created_at: Utc::now(),
            delivery: None,
        }
    }
}
