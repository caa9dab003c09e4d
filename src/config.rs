//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::store::StorageLayout;
use crate::{AppError, Result};

/// Keyring service under which Slack tokens are stored.
const KEYRING_SERVICE: &str = "agent-relay";

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Channel where session threads and job notices are posted.
    #[serde(default)]
    pub channel_id: String,
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

impl SlackConfig {
    /// Whether both tokens and a channel are available.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.channel_id.is_empty() && !self.app_token.is_empty() && !self.bot_token.is_empty()
    }
}

/// External agent process spawned for each queued job.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Host CLI binary (e.g. `claude`).
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Arguments placed before the job prompt.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Working directory for spawned jobs; defaults to the process cwd.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_cli: default_host_cli(),
            host_cli_args: Vec::new(),
            workspace_root: None,
        }
    }
}

fn default_host_cli() -> String {
    "claude".into()
}

/// Execution queue limits and supervisor timings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum number of queued plus running jobs.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Maximum number of jobs running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Wall-clock limit for a single job.
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    /// How long terminal jobs stay in the queue document.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Period of the dequeue/cleanup loop.
    #[serde(default = "default_consumer_interval_seconds")]
    pub consumer_interval_seconds: u64,
    /// Overall deadline for acquiring the queue lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Age after which a lock file is considered abandoned.
    #[serde(default = "default_lock_stale_ms")]
    pub lock_stale_ms: u64,
    /// Cap on captured stdout/stderr per job.
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrency: default_max_concurrency(),
            job_timeout_seconds: default_job_timeout_seconds(),
            retention_hours: default_retention_hours(),
            consumer_interval_seconds: default_consumer_interval_seconds(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_stale_ms: default_lock_stale_ms(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }
}

fn default_max_queue_size() -> usize {
    5
}

fn default_max_concurrency() -> usize {
    1
}

fn default_job_timeout_seconds() -> u64 {
    1800
}

fn default_retention_hours() -> u64 {
    24
}

fn default_consumer_interval_seconds() -> u64 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_lock_stale_ms() -> u64 {
    60_000
}

fn default_output_limit_bytes() -> usize {
    64 * 1024
}

/// Change poller timings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PollerConfig {
    /// Fixed tick period.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Minimum question age before it is delivered.
    #[serde(default)]
    pub question_delay_seconds: u64,
    /// Minimum spacing between file-watch triggered ticks.
    #[serde(default = "default_trigger_cooldown_ms")]
    pub trigger_cooldown_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            question_delay_seconds: 0,
            trigger_cooldown_ms: default_trigger_cooldown_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_trigger_cooldown_ms() -> u64 {
    500
}

/// Session liveness settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Period between heartbeat touches.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_seconds: u64,
    /// Heartbeat age after which the sweep terminates a session.
    #[serde(default = "default_stale_seconds")]
    pub stale_seconds: u64,
    /// Period of the staleness sweep in the bot process.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Tool inactivity after which the session reports `idle`.
    #[serde(default = "default_idle_after")]
    pub idle_after_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_heartbeat_interval(),
            stale_seconds: default_stale_seconds(),
            sweep_interval_seconds: default_sweep_interval(),
            idle_after_seconds: default_idle_after(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_seconds() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_after() -> u64 {
    120
}

/// Timeouts for blocking tool interactions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Default wait for a human response to a question.
    #[serde(default = "default_response_seconds")]
    pub response_seconds: u64,
    /// Default wait in `check_commands`; 0 returns immediately.
    #[serde(default)]
    pub command_wait_seconds: u64,
    /// Probe interval for deadline waits.
    #[serde(default = "default_wait_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_seconds: default_response_seconds(),
            command_wait_seconds: 0,
            poll_interval_ms: default_wait_poll_ms(),
        }
    }
}

fn default_response_seconds() -> u64 {
    600
}

fn default_wait_poll_ms() -> u64 {
    1000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory tree shared by all cooperating processes.
    pub storage_root: PathBuf,
    /// Slack user IDs allowed to answer, command, and queue jobs.
    pub authorized_user_ids: Vec<String>,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// External agent process settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Execution queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Change poller settings.
    #[serde(default)]
    pub poller: PollerConfig,
    /// Heartbeat and staleness settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Blocking wait settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// Missing credentials are not an error: the bot then runs in
    /// local-only mode.
    pub async fn load_credentials(&mut self) {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN")
            .await
            .unwrap_or_default();
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN")
            .await
            .unwrap_or_default();
    }

    /// Storage layout rooted at `storage_root`.
    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_root)
    }

    /// Validate that a Slack user may interact with sessions and the queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not in the allowed list.
    pub fn ensure_authorized(&self, user_id: &str) -> Result<()> {
        if self.authorized_user_ids.iter().any(|id| id == user_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not authorized".into()))
        }
    }

    /// Configured job timeout.
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.job_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.authorized_user_ids.is_empty() {
            return Err(AppError::Config(
                "authorized_user_ids must not be empty".into(),
            ));
        }

        if self.queue.max_queue_size == 0 || self.queue.max_concurrency == 0 {
            return Err(AppError::Config(
                "queue limits must be greater than zero".into(),
            ));
        }

        if self.queue.max_concurrency > self.queue.max_queue_size {
            return Err(AppError::Config(
                "max_concurrency must not exceed max_queue_size".into(),
            ));
        }

        if self.poller.interval_ms == 0
            || self.heartbeat.interval_seconds == 0
            || self.heartbeat.sweep_interval_seconds == 0
            || self.queue.consumer_interval_seconds == 0
            || self.timeouts.poll_interval_ms == 0
        {
            return Err(AppError::Config("intervals must be greater than zero".into()));
        }

        if self.storage_root.as_os_str().is_empty() {
            return Err(AppError::Config("storage_root must not be empty".into()));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
