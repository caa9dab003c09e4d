//! `/relay` slash command router.
//!
//! ```text
//! /relay run <prompt>     queue a job for the host CLI
//! /relay queue            list queued and recent jobs
//! /relay cancel <id>      cancel a job by unique id prefix
//! /relay status           list live sessions
//! /relay cmd <text>       send a command to the current session
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackCommandEvent,
    SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{info, info_span, Instrument};

use crate::models::command::CommandDocument;
use crate::models::job::{EnqueueOptions, Job};
use crate::registry::{list_live_sessions, resolve_session};
use crate::slack::BotState;
use crate::store::SessionDocuments;

const USAGE: &str = "Usage: `/relay run <prompt>` | `queue` | `cancel <id>` | `status` | `cmd <text>`";

/// Parsed `/relay` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// Queue a job.
    Run(String),
    /// List jobs.
    Queue,
    /// Cancel a job by id prefix.
    Cancel(String),
    /// List live sessions.
    Status,
    /// Send a command to the current session.
    Cmd(String),
    /// Anything unrecognised.
    Help,
}

impl RelayCommand {
    /// Parse the text following `/relay`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (verb, rest) = text
            .split_once(char::is_whitespace)
            .map_or((text, ""), |(verb, rest)| (verb, rest.trim()));
        match (verb.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("run", false) => Self::Run(rest.to_owned()),
            ("queue", _) => Self::Queue,
            ("cancel", false) => Self::Cancel(rest.to_owned()),
            ("status", _) => Self::Status,
            ("cmd", false) => Self::Cmd(rest.to_owned()),
            _ => Self::Help,
        }
    }
}

/// Execute a parsed command on behalf of `user_id` and return the reply.
pub async fn dispatch(state: &BotState, user_id: &str, command: RelayCommand) -> String {
    match command {
        RelayCommand::Run(prompt) => {
            match state
                .queue
                .enqueue(&prompt, user_id, EnqueueOptions::default())
                .await
            {
                Ok(job) => format!("\u{1f4e5} Queued job `{}`", job.short_id()),
                Err(err) => format!("\u{274c} {err}"),
            }
        }
        RelayCommand::Queue => format_jobs(&state.queue.list()),
        RelayCommand::Cancel(prefix) => match state.queue.cancel_job_by_id(&prefix).await {
            Ok(Some(job)) => format!("\u{1f6d1} Cancelled job `{}`", job.short_id()),
            Ok(None) => format!("No single active job matches `{prefix}`"),
            Err(err) => format!("\u{274c} {err}"),
        },
        RelayCommand::Status => {
            let sessions = list_live_sessions(&state.layout);
            if sessions.is_empty() {
                return "No live sessions".to_owned();
            }
            let mut out = String::new();
            for session in sessions {
                let branch = session.git_branch.as_deref().unwrap_or("-");
                let _ = writeln!(
                    out,
                    "\u{2022} `{}` {} ({branch}) {:?}",
                    session.session_id, session.project_name, session.status
                );
            }
            out
        }
        RelayCommand::Cmd(text) => {
            let Some(session) = resolve_session(&state.layout) else {
                return "No live session to send the command to".to_owned();
            };
            let command = CommandDocument::new(
                session.session_id.clone(),
                text,
                user_id.to_owned(),
            );
            match SessionDocuments::new(state.layout.clone(), &session.session_id)
                .and_then(|docs| docs.write_command(&command))
            {
                Ok(()) => format!("\u{1f4e8} Command sent to `{}`", session.project_name),
                Err(err) => format!("\u{274c} {err}"),
            }
        }
        RelayCommand::Help => USAGE.to_owned(),
    }
}

fn format_jobs(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "Queue is empty".to_owned();
    }
    let mut out = String::new();
    for job in jobs {
        let mut prompt: String = job.prompt.chars().take(60).collect();
        if prompt.len() < job.prompt.len() {
            prompt.push('\u{2026}');
        }
        let _ = writeln!(
            out,
            "\u{2022} `{}` {}: {prompt}",
            job.short_id(),
            job.status.as_str()
        );
    }
    out
}

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Never fails; every outcome is reported back as an ephemeral reply.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    let user_id = event.user_id.to_string();
    let app: Option<Arc<BotState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<BotState>>().cloned()
    };

    let reply = match app {
        None => "Relay is not ready yet".to_owned(),
        Some(app) if !app.is_authorized(&user_id) => {
            "You are not authorized to use /relay".to_owned()
        }
        Some(app) => {
            let command = RelayCommand::parse(event.text.as_deref().unwrap_or_default());
            let span = info_span!("slash_command", user_id = %user_id, command = ?command);
            async {
                info!("dispatching slash command");
                dispatch(&app, &user_id, command).await
            }
            .instrument(span)
            .await
        }
    };

    Ok(SlackCommandEventResponse::new(SlackMessageContent::new().with_text(reply))
        .with_response_type(SlackMessageResponseType::Ephemeral))
}
