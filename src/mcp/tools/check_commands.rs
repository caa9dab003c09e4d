//! `check_commands` MCP tool handler.
//!
//! Returns pending operator commands and acknowledges them, so each
//! command is handed to the agent once. A zero wait is a single check
//! reported as `"empty"`; a wait whose deadline passes is `"timeout"`.

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::util::{json_result, parse_input, session_documents, to_error_data};
use crate::models::command::CommandDocument;
use crate::store::SessionDocuments;
use crate::wait::{poll_until, WaitOutcome};

#[derive(Debug, serde::Deserialize)]
struct CheckCommandsInput {
    wait_seconds: Option<u64>,
}

/// How a check for commands ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandsOutcome {
    /// Pending commands, now acknowledged.
    Received(Vec<CommandDocument>),
    /// Nothing pending and no wait was requested.
    Empty,
    /// Nothing arrived before the deadline.
    TimedOut,
}

impl CommandsOutcome {
    /// JSON payload returned to the agent.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let (status, commands) = match self {
            Self::Received(commands) => ("ok", commands.iter().map(command_json).collect()),
            Self::Empty => ("empty", Vec::new()),
            Self::TimedOut => ("timeout", Vec::new()),
        };
        json!({ "status": status, "commands": commands })
    }
}

fn command_json(command: &CommandDocument) -> serde_json::Value {
    json!({
        "command_id": command.command_id,
        "text": command.text,
        "requested_by": command.requested_by,
        "created_at": command.created_at,
    })
}

/// Take pending commands, polling every `interval` for up to `wait`.
///
/// # Errors
///
/// Returns `AppError::Io` if acknowledging a command fails.
pub async fn collect_commands(
    documents: &SessionDocuments,
    wait: Duration,
    interval: Duration,
) -> crate::Result<CommandsOutcome> {
    let outcome = poll_until(wait, interval, || async {
        match documents.take_pending_commands() {
            Ok(commands) if commands.is_empty() => None,
            Ok(commands) => Some(Ok(commands)),
            Err(err) => Some(Err(err)),
        }
    })
    .await;

    match outcome {
        WaitOutcome::Ready(commands) => Ok(CommandsOutcome::Received(commands?)),
        WaitOutcome::TimedOut if wait.is_zero() => Ok(CommandsOutcome::Empty),
        WaitOutcome::TimedOut => Ok(CommandsOutcome::TimedOut),
    }
}

/// Handle the `check_commands` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on storage failures.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: CheckCommandsInput = parse_input("check_commands", context.arguments)?;
    let wait = Duration::from_secs(
        input
            .wait_seconds
            .unwrap_or(state.config.timeouts.command_wait_seconds),
    );

    let span = info_span!("check_commands", wait_secs = wait.as_secs());
    async move {
        let documents = session_documents(&state).await?;
        let interval = Duration::from_millis(state.config.timeouts.poll_interval_ms);

        let outcome = collect_commands(&documents, wait, interval)
            .await
            .map_err(|err| {
                warn!(%err, "failed to take pending commands");
                to_error_data(&err)
            })?;

        let count = match &outcome {
            CommandsOutcome::Received(commands) => commands.len(),
            CommandsOutcome::Empty | CommandsOutcome::TimedOut => 0,
        };
        info!(count, "check_commands completed");
        json_result(outcome.to_json())
    }
    .instrument(span)
    .await
}
