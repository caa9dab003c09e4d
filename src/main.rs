#![forbid(unsafe_code)]

//! `agent-relay` binary.
//!
//! `mcp` serves the session-scoped tools over stdio for one agent process;
//! `bot` runs the long-lived poller, staleness sweep, queue consumer and
//! Slack Socket Mode listener.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::mcp::handler::AppState;
use agent_relay::mcp::transport;
use agent_relay::notifier::{LocalNotifier, Notifier};
use agent_relay::poller::{
    spawn_change_poller, watch_sessions, ChangePoller, PollTrigger, PollerOptions, ThreadDirectory,
};
use agent_relay::queue::{
    spawn_queue_consumer, ExecutionQueue, JobSupervisor, QueueLimits, SupervisorConfig,
};
use agent_relay::registry::{spawn_staleness_sweep, HeartbeatOptions, SessionRegistry};
use agent_relay::slack::{BotState, SlackService};
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the agent tools over MCP stdio for one session.
    Mcp {
        /// Project directory the agent works in.
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Run the chat bot: poller, staleness sweep, queue consumer and Slack.
    Bot,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Agent relay tool server and bot", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(storage_root = %config.storage_root.display(), "configuration loaded");

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    match args.command {
        Command::Mcp { project } => run_mcp(Arc::new(config), project, ct).await,
        Command::Bot => run_bot(config, ct).await,
    }
}

async fn run_mcp(config: Arc<GlobalConfig>, project: PathBuf, ct: CancellationToken) -> Result<()> {
    let registry = Arc::new(SessionRegistry::new(
        config.layout(),
        HeartbeatOptions::from(&config.heartbeat),
    ));
    let session = registry.create_session(&project).await?;
    info!(session_id = %session.session_id, project = %session.project_name, "session created");

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        registry: Arc::clone(&registry),
    });
    let served = transport::serve_stdio(state, ct.clone()).await;
    if let Err(err) = &served {
        error!(%err, "stdio transport failed");
    }

    let reason = if ct.is_cancelled() {
        "tool server shut down"
    } else {
        "agent disconnected"
    };
    registry.terminate_session(reason).await;
    info!("session terminated");
    served
}

async fn run_bot(mut config: GlobalConfig, ct: CancellationToken) -> Result<()> {
    config.load_credentials().await;
    let config = Arc::new(config);
    let layout = config.layout();
    std::fs::create_dir_all(layout.sessions_dir())?;

    let queue = Arc::new(ExecutionQueue::new(
        layout.clone(),
        QueueLimits::from(&config.queue),
    ));
    let threads = ThreadDirectory::new();

    let mut socket_handle = None;
    let notifier: Arc<dyn Notifier> = if config.slack.is_configured() {
        let slack = Arc::new(SlackService::new(&config.slack)?);
        let notifier: Arc<dyn Notifier> = slack.clone();
        let bot_state = Arc::new(BotState {
            config: Arc::clone(&config),
            layout: layout.clone(),
            queue: Arc::clone(&queue),
            threads: threads.clone(),
            notifier: Arc::clone(&notifier),
        });
        socket_handle = Some(slack.start_socket_mode(bot_state, ct.clone()));
        info!("slack service started");
        notifier
    } else {
        info!("slack not configured; running in local-only mode");
        Arc::new(LocalNotifier::new())
    };

    let supervisor = Arc::new(JobSupervisor::new(
        Arc::clone(&queue),
        Arc::clone(&notifier),
        SupervisorConfig::from_config(&config),
    ));
    let consumer_handle = spawn_queue_consumer(
        Arc::clone(&queue),
        supervisor,
        Duration::from_secs(config.queue.consumer_interval_seconds),
        ct.clone(),
    );

    let sweep_handle = spawn_staleness_sweep(
        layout.clone(),
        Duration::from_secs(config.heartbeat.stale_seconds),
        Duration::from_secs(config.heartbeat.sweep_interval_seconds),
        Arc::clone(&notifier),
        ct.clone(),
    );

    let trigger = PollTrigger::new(Duration::from_millis(config.poller.trigger_cooldown_ms));
    let watcher = match watch_sessions(&layout, Arc::clone(&trigger)) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(%err, "file watcher unavailable; relying on periodic polling");
            None
        }
    };
    let poller = Arc::new(ChangePoller::new(
        layout,
        notifier,
        threads,
        PollerOptions::from(&config.poller),
    ));
    let poller_handle =
        spawn_change_poller(poller, watcher.as_ref().map(|_| trigger), ct.clone());

    info!("bot ready");
    ct.cancelled().await;

    let _ = tokio::join!(consumer_handle, sweep_handle, poller_handle);
    if let Some(handle) = socket_handle {
        let _ = handle.await;
    }
    drop(watcher);
    info!("agent-relay bot shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Logs go to stderr: stdout carries MCP frames in `mcp` mode.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
