//! Execution queue document and job state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_record_id, ThreadHandle};

/// Lifecycle status for a queued job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Queued,
    /// A process is running the job.
    Running,
    /// The process exited with status 0.
    Completed,
    /// Spawn error, non-zero exit, timeout, or supervisor error.
    Failed,
    /// Cancelled by a requester.
    Cancelled,
    /// Stopped because the consumer shut down.
    Stopped,
}

impl JobStatus {
    /// Counted against `max_queue_size`.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Lowercase label for display.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }
}

/// One unit of work: a prompt run by a spawned host CLI process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Job {
    /// Unique job identifier.
    pub id: String,
    /// Prompt passed to the host CLI.
    pub prompt: String,
    /// Who enqueued the job.
    pub requested_by: String,
    /// Enqueue timestamp; dequeue order follows it.
    pub requested_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Process id while running.
    #[serde(default)]
    pub pid: Option<u32>,
    /// When the job moved to `Running`.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Captured output on success.
    #[serde(default)]
    pub result: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
    /// Process exit code, when one was observed.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Wall-clock run time in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Thread the job's notices are posted into.
    #[serde(default)]
    pub thread: Option<ThreadHandle>,
    /// Working directory for the spawned process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Job {
    /// Construct a new queued job.
    #[must_use]
    pub fn new(prompt: String, requested_by: String) -> Self {
        Self {
            id: new_record_id(),
            prompt,
            requested_by,
            requested_at: Utc::now(),
            status: JobStatus::Queued,
            pid: None,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            exit_code: None,
            duration_ms: None,
            thread: None,
            working_dir: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Any active status may fail; otherwise
    /// `queued -> running | cancelled` and
    /// `running -> completed | cancelled | stopped`.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self.status, next),
            (JobStatus::Queued | JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Queued, JobStatus::Running | JobStatus::Cancelled)
                | (
                    JobStatus::Running,
                    JobStatus::Completed | JobStatus::Cancelled | JobStatus::Stopped
                )
        )
    }

    /// Short id prefix for display.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Optional settings supplied at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Thread to post notices into.
    pub thread: Option<ThreadHandle>,
    /// Working directory override.
    pub working_dir: Option<PathBuf>,
}

/// The single global queue document, `execution-queue.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueDocument {
    /// Jobs in enqueue order.
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Last mutation timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueueDocument {
    /// Jobs counted against `max_queue_size`.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status.is_active()).count()
    }

    /// Jobs counted against `max_concurrency`.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    /// Exact id lookup.
    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Indices of jobs whose id starts with `prefix`.
    #[must_use]
    pub fn matching_prefix(&self, prefix: &str) -> Vec<usize> {
        if prefix.is_empty() {
            return Vec::new();
        }
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.id.starts_with(prefix))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Index of the earliest queued job by `requested_at`, then id.
    #[must_use]
    pub fn earliest_queued(&self) -> Option<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Queued)
            .min_by(|(_, a), (_, b)| {
                a.requested_at
                    .cmp(&b.requested_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(idx, _)| idx)
    }
}
