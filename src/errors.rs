//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The queue lock could not be acquired before the deadline.
    Lock(String),
    /// Enqueue rejected because the active job count reached the limit.
    QueueFull {
        /// Jobs currently queued or running.
        active: usize,
        /// Configured maximum.
        max: usize,
    },
    /// An identifier prefix matched more than one record.
    AmbiguousId(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Identifier or path failed validation before touching the filesystem.
    PathViolation(String),
    /// Requested state change is not permitted by the lifecycle.
    InvalidTransition(String),
    /// External process spawn or supervision failure.
    Process(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// MCP protocol or tool dispatch failure.
    Mcp(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Lock(msg) => write!(f, "lock: {msg}"),
            Self::QueueFull { active, max } => write!(f, "Queue is full ({active}/{max})"),
            Self::AmbiguousId(msg) => write!(f, "ambiguous id: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Mcp(msg) => write!(f, "mcp: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}
