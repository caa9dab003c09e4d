//! Slack bridge: outbound notifier and Socket Mode inbound handlers.

use std::sync::Arc;

use tracing::warn;

use crate::config::GlobalConfig;
use crate::notifier::Notifier;
use crate::poller::ThreadDirectory;
use crate::queue::ExecutionQueue;
use crate::store::StorageLayout;

pub mod blocks;
pub mod client;
pub mod commands;
pub mod events;

pub use client::SlackService;

/// State shared with the Socket Mode callbacks.
pub struct BotState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Storage root shared with the tool servers.
    pub layout: StorageLayout,
    /// Execution queue for `/relay run` and friends.
    pub queue: Arc<ExecutionQueue>,
    /// Thread to session mapping maintained by the poller.
    pub threads: ThreadDirectory,
    /// Notifier used to update answered questions.
    pub notifier: Arc<dyn Notifier>,
}

impl BotState {
    /// Whether `user_id` may answer, command and queue jobs.
    ///
    /// Unauthorized attempts are logged and otherwise ignored.
    #[must_use]
    pub fn is_authorized(&self, user_id: &str) -> bool {
        if self.config.ensure_authorized(user_id).is_ok() {
            return true;
        }
        warn!(user_id, "unauthorized user attempted slack interaction (ignored)");
        false
    }
}
