//! Spawns and supervises the external process that runs each job.
//!
//! One call to [`JobSupervisor::execute`] owns one child process: it
//! records the pid, drains stdout/stderr into capped buffers, races the
//! exit against the job timeout, and writes the terminal status back to
//! the queue. Process errors never escape as `Err`; they land on the job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::job::{Job, JobStatus};
use crate::notifier::{DeliveryTarget, Notifier, OutboundMessage};
use crate::queue::execution_queue::{ExecutionQueue, JobOutcome};
use crate::queue::process;

/// Environment variables never passed to job processes.
const STRIPPED_ENV_VARS: &[&str] = &["SLACK_APP_TOKEN", "SLACK_BOT_TOKEN"];

const READ_CHUNK: usize = 8192;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How job processes are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Host CLI binary.
    pub host_cli: String,
    /// Arguments placed before the prompt.
    pub host_cli_args: Vec<String>,
    /// Default working directory.
    pub working_dir: PathBuf,
    /// Per-job execution timeout.
    pub timeout: Duration,
    /// Bytes of stdout/stderr retained per stream.
    pub output_limit: usize,
}

impl SupervisorConfig {
    /// Derive launch settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            host_cli: config.agent.host_cli.clone(),
            host_cli_args: config.agent.host_cli_args.clone(),
            working_dir: config
                .agent
                .workspace_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            timeout: config.job_timeout(),
            output_limit: config.queue.output_limit_bytes,
        }
    }
}

#[derive(Debug)]
struct RunningJob {
    pid: Option<u32>,
    cancel: CancellationToken,
}

/// Owns in-flight job processes for this consumer.
pub struct JobSupervisor {
    queue: Arc<ExecutionQueue>,
    notifier: Arc<dyn Notifier>,
    config: SupervisorConfig,
    running: Mutex<HashMap<String, RunningJob>>,
}

enum Completion {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Stopped,
}

impl JobSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        queue: Arc<ExecutionQueue>,
        notifier: Arc<dyn Notifier>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            queue,
            notifier,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Ids of jobs this supervisor is currently running.
    pub async fn running_job_ids(&self) -> Vec<String> {
        self.running.lock().await.keys().cloned().collect()
    }

    /// Run a job that `dequeue` just moved to `running`. Returns the job
    /// as finally recorded, or `None` if another actor (cancel, stop)
    /// already moved it to a terminal status. A job cancelled before its
    /// pid is recorded has its process killed at once.
    pub async fn execute(&self, job: Job) -> Option<Job> {
        let span = info_span!("execute_job", job_id = %job.id);
        self.execute_inner(job).instrument(span).await
    }

    async fn execute_inner(&self, job: Job) -> Option<Job> {
        if self
            .queue
            .get(&job.id)
            .is_some_and(|recorded| recorded.status != JobStatus::Running)
        {
            debug!("job left running before spawn; not starting it");
            self.notice_discarded(&job.id).await;
            return None;
        }

        let started = Instant::now();
        let mut child = match self.spawn(&job) {
            Ok(child) => child,
            Err(err) => {
                warn!(%err, "failed to spawn job process");
                let outcome = JobOutcome::error(format!("spawn failed: {err}"));
                return self.finish(&job, JobStatus::Failed, outcome).await;
            }
        };

        let pid = child.id();
        let cancel = CancellationToken::new();
        self.running.lock().await.insert(
            job.id.clone(),
            RunningJob {
                pid,
                cancel: cancel.clone(),
            },
        );
        if let Some(pid) = pid {
            match self.queue.set_pid(&job.id, pid).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(pid, "job no longer running; killing its process");
                    terminate(&mut child, Some(pid)).await;
                    self.running.lock().await.remove(&job.id);
                    self.notice_discarded(&job.id).await;
                    return None;
                }
                Err(err) => warn!(pid, %err, "failed to record job pid"),
            }
        }
        info!(pid, "job process started");

        let limit = self.config.output_limit;
        let stdout = child.stdout.take().map(|s| spawn_reader(s, limit));
        let stderr = child.stderr.take().map(|s| spawn_reader(s, limit));

        let completion = tokio::select! {
            status = child.wait() => Completion::Exited(status),
            () = tokio::time::sleep(self.config.timeout) => Completion::TimedOut,
            () = cancel.cancelled() => Completion::Stopped,
        };

        if !matches!(completion, Completion::Exited(_)) {
            terminate(&mut child, pid).await;
        }

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, outcome) = match completion {
            Completion::Exited(Ok(exit)) if exit.success() => (
                JobStatus::Completed,
                JobOutcome {
                    result: Some(stdout),
                    error: None,
                    exit_code: exit.code(),
                    duration_ms: Some(duration_ms),
                },
            ),
            Completion::Exited(Ok(exit)) => {
                let reason = exit.code().map_or_else(
                    || "terminated by signal".to_owned(),
                    |c| format!("exited with code {c}"),
                );
                (
                    JobStatus::Failed,
                    JobOutcome {
                        result: (!stdout.is_empty()).then_some(stdout),
                        error: Some(with_detail(reason, &stderr)),
                        exit_code: exit.code(),
                        duration_ms: Some(duration_ms),
                    },
                )
            }
            Completion::Exited(Err(err)) => (
                JobStatus::Failed,
                JobOutcome {
                    error: Some(format!("wait failed: {err}")),
                    duration_ms: Some(duration_ms),
                    ..JobOutcome::default()
                },
            ),
            Completion::TimedOut => (
                JobStatus::Failed,
                JobOutcome {
                    result: (!stdout.is_empty()).then_some(stdout),
                    error: Some(format!(
                        "timed out after {}s",
                        self.config.timeout.as_secs()
                    )),
                    duration_ms: Some(duration_ms),
                    ..JobOutcome::default()
                },
            ),
            Completion::Stopped => (
                JobStatus::Stopped,
                JobOutcome {
                    error: Some("stopped on shutdown".into()),
                    duration_ms: Some(duration_ms),
                    ..JobOutcome::default()
                },
            ),
        };

        let finished = self.finish(&job, status, outcome).await;
        self.running.lock().await.remove(&job.id);
        finished
    }

    /// Stop every running job: mark it `stopped`, then kill its process tree.
    pub async fn stop_all(&self) {
        let jobs: Vec<(String, Option<u32>, CancellationToken)> = self
            .running
            .lock()
            .await
            .iter()
            .map(|(id, run)| (id.clone(), run.pid, run.cancel.clone()))
            .collect();
        if jobs.is_empty() {
            return;
        }

        let ids: Vec<String> = jobs.iter().map(|(id, _, _)| id.clone()).collect();
        match self.queue.stop_jobs(&ids).await {
            Ok(stopped) => info!(count = stopped.len(), "running jobs stopped"),
            Err(err) => warn!(%err, "failed to mark jobs stopped"),
        }
        for (_, _, cancel) in jobs {
            cancel.cancel();
        }
    }

    fn spawn(&self, job: &Job) -> std::io::Result<Child> {
        let working_dir = job
            .working_dir
            .clone()
            .unwrap_or_else(|| self.config.working_dir.clone());

        let mut cmd = Command::new(&self.config.host_cli);
        cmd.args(&self.config.host_cli_args)
            .arg(&job.prompt)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in STRIPPED_ENV_VARS {
            cmd.env_remove(key);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }

    async fn finish(&self, job: &Job, status: JobStatus, outcome: JobOutcome) -> Option<Job> {
        let finished = match self.queue.finish_job(&job.id, status, outcome).await {
            Ok(Some(finished)) => finished,
            Ok(None) => {
                debug!("job already terminal; result discarded");
                self.notice_discarded(&job.id).await;
                return None;
            }
            Err(err) => {
                warn!(%err, "failed to record job result");
                return None;
            }
        };
        info!(status = finished.status.as_str(), "job finished");
        self.post_notice(&finished).await;
        Some(finished)
    }

    /// Announce the status another actor recorded for a job whose own
    /// result was dropped.
    async fn notice_discarded(&self, job_id: &str) {
        match self.queue.get(job_id) {
            Some(recorded) if recorded.status.is_terminal() => self.post_notice(&recorded).await,
            _ => debug!(job_id, "no terminal status to announce"),
        }
    }

    async fn post_notice(&self, job: &Job) {
        let mut text = format!("Job `{}` {}", job.short_id(), job.status.as_str());
        if let Some(ms) = job.duration_ms {
            text.push_str(&format!(" in {:.1}s", Duration::from_millis(ms).as_secs_f64()));
        }
        if let Some(err) = &job.error {
            text.push_str(&format!(": {err}"));
        }

        let target = DeliveryTarget::from_thread(job.thread.as_ref());
        if let Err(err) = self
            .notifier
            .deliver(target, OutboundMessage::plain(text))
            .await
        {
            warn!(job_id = %job.id, %err, "failed to post job notice");
        }
    }
}

/// Kill the job's process tree and reap the child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    let killed = pid.is_some_and(|pid| match process::kill_tree(pid) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, %err, "process-group kill failed; killing child directly");
            false
        }
    });
    if !killed {
        if let Err(err) = child.start_kill() {
            warn!(%err, "failed to kill job process");
        }
    }
    if let Err(err) = child.wait().await {
        warn!(%err, "failed to reap job process");
    }
}

/// Bytes retained from one output stream.
#[derive(Debug, Default)]
struct CappedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

fn spawn_reader<R>(mut stream: R, limit: usize) -> JoinHandle<CappedOutput>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = CappedOutput::default();
        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(out.bytes.len());
                    if n > room {
                        out.truncated = true;
                    }
                    out.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(err) => {
                    debug!(%err, "job output stream closed with error");
                    break;
                }
            }
        }
        out
    })
}

async fn collect(reader: Option<JoinHandle<CappedOutput>>) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
        Ok(Ok(out)) => {
            let mut text = String::from_utf8_lossy(&out.bytes).into_owned();
            if out.truncated {
                text.push_str("\n[output truncated]");
            }
            text
        }
        Ok(Err(err)) => {
            warn!(%err, "output reader task failed");
            String::new()
        }
        Err(_) => {
            warn!("timed out draining job output");
            String::new()
        }
    }
}

fn with_detail(reason: String, stderr: &str) -> String {
    let detail = stderr.trim();
    if detail.is_empty() {
        reason
    } else {
        format!("{reason}: {detail}")
    }
}
