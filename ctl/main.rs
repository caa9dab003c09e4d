#![forbid(unsafe_code)]

//! `agent-relay-ctl`: local operator CLI for `agent-relay`.
//!
//! Acts directly on the storage root, so it works whether or not the bot
//! is running. Output is pretty-printed JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use agent_relay::config::GlobalConfig;
use agent_relay::models::command::CommandDocument;
use agent_relay::models::job::EnqueueOptions;
use agent_relay::queue::{ExecutionQueue, QueueLimits};
use agent_relay::registry::resolver::list_sessions;
use agent_relay::registry::{list_live_sessions, resolve_session};
use agent_relay::store::{SessionDocuments, StorageLayout};
use agent_relay::{AppError, Result};

const CTL_SOURCE: &str = "ctl";

#[derive(Debug, Parser)]
#[command(
    name = "agent-relay-ctl",
    about = "Local CLI for agent-relay",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the session other processes would resolve to.
    Resolve,

    /// List sessions.
    Sessions {
        /// Include terminated sessions.
        #[arg(long)]
        all: bool,
    },

    /// Queue a job for the host CLI.
    Enqueue {
        /// Prompt passed to the host CLI.
        prompt: String,
        /// Requester recorded on the job.
        #[arg(long)]
        requested_by: Option<String>,
        /// Working directory for the job process.
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },

    /// List jobs in the execution queue.
    Queue,

    /// Cancel a job by unique id prefix.
    Cancel {
        /// Job id or unique prefix.
        id: String,
    },

    /// Answer a pending question.
    Answer {
        /// Question id.
        question_id: String,
        /// Answer text.
        answer: String,
        /// Session owning the question; defaults to the resolved session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Send a command to a session.
    Command {
        /// Command text.
        text: String,
        /// Target session; defaults to the resolved session.
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(value) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_default()
            );
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<serde_json::Value> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let layout = config.layout();
    let user = local_user();

    match args.command {
        Command::Resolve => {
            let session = resolve_session(&layout)
                .ok_or_else(|| AppError::NotFound("no live session".into()))?;
            Ok(serde_json::to_value(session)?)
        }
        Command::Sessions { all } => {
            let sessions = if all {
                list_sessions(&layout)
            } else {
                list_live_sessions(&layout)
            };
            Ok(serde_json::to_value(sessions)?)
        }
        Command::Enqueue {
            prompt,
            requested_by,
            working_dir,
        } => {
            let queue = ExecutionQueue::new(layout, QueueLimits::from(&config.queue));
            let options = EnqueueOptions {
                working_dir,
                ..EnqueueOptions::default()
            };
            let job = queue
                .enqueue(&prompt, requested_by.as_deref().unwrap_or(&user), options)
                .await?;
            Ok(serde_json::to_value(job)?)
        }
        Command::Queue => {
            let queue = ExecutionQueue::new(layout, QueueLimits::from(&config.queue));
            Ok(serde_json::to_value(queue.list())?)
        }
        Command::Cancel { id } => {
            let queue = ExecutionQueue::new(layout, QueueLimits::from(&config.queue));
            // Typed errors for unknown or ambiguous prefixes.
            queue.get_by_prefix(&id)?;
            let job = queue.cancel_job_by_id(&id).await?.ok_or_else(|| {
                AppError::InvalidTransition(format!("job {id} is no longer active"))
            })?;
            Ok(serde_json::to_value(job)?)
        }
        Command::Answer {
            question_id,
            answer,
            session,
        } => {
            let documents = target_session(&layout, session)?;
            let response =
                documents.record_response(&question_id, &answer, Some(&user), CTL_SOURCE)?;
            Ok(serde_json::to_value(response)?)
        }
        Command::Command { text, session } => {
            let documents = target_session(&layout, session)?;
            let command = CommandDocument::new(documents.session_id().to_owned(), text, user);
            documents.write_command(&command)?;
            Ok(json!({
                "session_id": command.session_id,
                "command_id": command.command_id,
            }))
        }
    }
}

fn target_session(layout: &StorageLayout, session: Option<String>) -> Result<SessionDocuments> {
    let session_id = match session {
        Some(id) => id,
        None => {
            resolve_session(layout)
                .ok_or_else(|| AppError::NotFound("no live session".into()))?
                .session_id
        }
    };
    SessionDocuments::new(layout.clone(), &session_id)
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_owned())
}
