//! Bounded execution queue persisted as `execution-queue.json`.
//!
//! Every mutation acquires the queue lock, performs one read-modify-write
//! of the document, and releases. A failed operation leaves the document
//! untouched.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::models::job::{EnqueueOptions, Job, JobStatus, QueueDocument};
use crate::queue::process;
use crate::store::{record, DocumentLock, LockOptions, StorageLayout};
use crate::{AppError, Result};

/// Limits enforced on every queue mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum number of queued plus running jobs.
    pub max_queue_size: usize,
    /// Maximum number of running jobs.
    pub max_concurrency: usize,
    /// How long terminal jobs are kept.
    pub retention: Duration,
    /// Lock timing.
    pub lock: LockOptions,
}

impl From<&QueueConfig> for QueueLimits {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_concurrency: config.max_concurrency,
            retention: Duration::from_secs(config.retention_hours.saturating_mul(3600)),
            lock: LockOptions {
                timeout: Duration::from_millis(config.lock_timeout_ms),
                stale_after: Duration::from_millis(config.lock_stale_ms),
            },
        }
    }
}

/// Result fields recorded when a job reaches a terminal status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Captured output.
    pub result: Option<String>,
    /// Failure description.
    pub error: Option<String>,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Run time in milliseconds.
    pub duration_ms: Option<u64>,
}

impl JobOutcome {
    /// Outcome carrying only an error description.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Lock-serialized access to the global queue document.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    layout: StorageLayout,
    limits: QueueLimits,
}

impl ExecutionQueue {
    /// Create a queue handle. Nothing is written until the first mutation.
    #[must_use]
    pub fn new(layout: StorageLayout, limits: QueueLimits) -> Self {
        Self { layout, limits }
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Add a job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueFull` when queued plus running jobs already
    /// reach `max_queue_size`, or `AppError::Lock` / `AppError::Io`.
    pub async fn enqueue(
        &self,
        prompt: &str,
        requested_by: &str,
        options: EnqueueOptions,
    ) -> Result<Job> {
        let max = self.limits.max_queue_size;
        self.transact(|doc| {
            let active = doc.active_count();
            if active >= max {
                return Err(AppError::QueueFull { active, max });
            }
            let mut job = Job::new(prompt.to_owned(), requested_by.to_owned());
            job.thread = options.thread;
            job.working_dir = options.working_dir;
            doc.jobs.push(job.clone());
            info!(job_id = %job.id, active = active + 1, max, "job enqueued");
            Ok((job, true))
        })
        .await
    }

    /// Flip the earliest queued job to running, unless every concurrency
    /// slot is taken or nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        let max = self.limits.max_concurrency;
        self.transact(|doc| {
            if doc.running_count() >= max {
                return Ok((None, false));
            }
            let Some(idx) = doc.earliest_queued() else {
                return Ok((None, false));
            };
            let job = &mut doc.jobs[idx];
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            debug!(job_id = %job.id, "job dequeued");
            Ok((Some(job.clone()), true))
        })
        .await
    }

    /// Record the pid of a running job. Returns `false` without writing
    /// when the job is unknown or no longer running, in which case the
    /// caller owns a process nobody wants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn set_pid(&self, job_id: &str, pid: u32) -> Result<bool> {
        self.transact(|doc| {
            let Some(job) = doc.job_mut(job_id) else {
                return Ok((false, false));
            };
            if job.status != JobStatus::Running {
                return Ok((false, false));
            }
            job.pid = Some(pid);
            Ok((true, true))
        })
        .await
    }

    /// Move a job to a terminal status. Returns `None` (and changes
    /// nothing) if the job is unknown or the transition is not permitted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        outcome: JobOutcome,
    ) -> Result<Option<Job>> {
        self.transact(|doc| {
            let Some(job) = doc.job_mut(job_id) else {
                return Ok((None, false));
            };
            if !job.can_transition_to(status) || !status.is_terminal() {
                debug!(
                    job_id,
                    from = job.status.as_str(),
                    to = status.as_str(),
                    "transition refused"
                );
                return Ok((None, false));
            }
            job.status = status;
            job.finished_at = Some(Utc::now());
            job.result = outcome.result;
            job.error = outcome.error;
            job.exit_code = outcome.exit_code;
            job.duration_ms = outcome.duration_ms;
            Ok((Some(job.clone()), true))
        })
        .await
    }

    /// Cancel the job whose id starts with `prefix`.
    ///
    /// Returns `None` without changing anything when the prefix matches no
    /// job, more than one job, or a job already in a terminal status. A
    /// running job's process tree is killed after the document is updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn cancel_job_by_id(&self, prefix: &str) -> Result<Option<Job>> {
        let cancelled = self
            .transact(|doc| {
                let matches = doc.matching_prefix(prefix);
                let [idx] = matches.as_slice() else {
                    debug!(prefix, matches = matches.len(), "no unique job for prefix");
                    return Ok((None, false));
                };
                let job = &mut doc.jobs[*idx];
                if !job.can_transition_to(JobStatus::Cancelled) {
                    return Ok((None, false));
                }
                let was_running = job.status == JobStatus::Running;
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                Ok((Some((job.clone(), was_running)), true))
            })
            .await?;

        let Some((job, was_running)) = cancelled else {
            return Ok(None);
        };
        if was_running {
            if let Some(pid) = job.pid {
                if let Err(err) = process::kill_tree(pid) {
                    warn!(job_id = %job.id, pid, %err, "failed to kill cancelled job");
                }
            }
        }
        info!(job_id = %job.id, was_running, "job cancelled");
        Ok(Some(job))
    }

    /// Mark the given running jobs `stopped`. Returns the jobs changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn stop_jobs(&self, job_ids: &[String]) -> Result<Vec<Job>> {
        self.transact(|doc| {
            let now = Utc::now();
            let mut stopped = Vec::new();
            for job in &mut doc.jobs {
                if job_ids.contains(&job.id) && job.can_transition_to(JobStatus::Stopped) {
                    job.status = JobStatus::Stopped;
                    job.finished_at = Some(now);
                    stopped.push(job.clone());
                }
            }
            let dirty = !stopped.is_empty();
            Ok((stopped, dirty))
        })
        .await
    }

    /// Fail running jobs whose process no longer exists. Run once when a
    /// consumer starts, before it dequeues anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn recover_orphaned_jobs(&self) -> Result<Vec<Job>> {
        self.recover_unsupervised_jobs(&[], Duration::ZERO).await
    }

    /// Fail running jobs that no one is supervising: not in `supervised`,
    /// and either their recorded process is gone or no pid was recorded
    /// within `grace` of the job starting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn recover_unsupervised_jobs(
        &self,
        supervised: &[String],
        grace: Duration,
    ) -> Result<Vec<Job>> {
        let grace =
            chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.transact(|doc| {
            let now = Utc::now();
            let mut recovered = Vec::new();
            for job in &mut doc.jobs {
                if job.status != JobStatus::Running || supervised.contains(&job.id) {
                    continue;
                }
                let abandoned = match job.pid {
                    Some(pid) => !process::pid_alive(pid),
                    None => job.started_at.is_none_or(|at| now - at >= grace),
                };
                if !abandoned {
                    continue;
                }
                job.status = JobStatus::Failed;
                job.error = Some("supervisor lost".into());
                job.finished_at = Some(now);
                recovered.push(job.clone());
            }
            let dirty = !recovered.is_empty();
            if dirty {
                warn!(count = recovered.len(), "recovered orphaned jobs");
            }
            Ok((recovered, dirty))
        })
        .await
    }

    /// Drop terminal jobs that finished more than `retention` ago.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Lock` or `AppError::Io`.
    pub async fn cleanup(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.limits.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.transact(|doc| {
            let cutoff = Utc::now() - retention;
            let before = doc.jobs.len();
            doc.jobs.retain(|job| {
                job.status.is_active() || job.finished_at.unwrap_or(job.requested_at) > cutoff
            });
            let removed = before - doc.jobs.len();
            Ok((removed, removed > 0))
        })
        .await
    }

    /// Snapshot of every job. Reads without the lock; the document is
    /// always replaced atomically.
    #[must_use]
    pub fn list(&self) -> Vec<Job> {
        self.snapshot().jobs
    }

    /// The job with exactly this id.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.snapshot().jobs.into_iter().find(|job| job.id == job_id)
    }

    /// Current queue document, empty if absent.
    #[must_use]
    pub fn snapshot(&self) -> QueueDocument {
        record::read_json(&self.layout.queue_path()).unwrap_or_default()
    }

    /// Look a job up by unique id prefix.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or `AppError::AmbiguousId`.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Job> {
        let doc = self.snapshot();
        match doc.matching_prefix(prefix).as_slice() {
            [] => Err(AppError::NotFound(format!("no job matches {prefix:?}"))),
            [idx] => Ok(doc.jobs[*idx].clone()),
            many => Err(AppError::AmbiguousId(format!(
                "{prefix:?} matches {} jobs",
                many.len()
            ))),
        }
    }

    async fn transact<T>(
        &self,
        apply: impl FnOnce(&mut QueueDocument) -> Result<(T, bool)>,
    ) -> Result<T> {
        let lock = DocumentLock::acquire(&self.layout.queue_lock_path(), self.limits.lock).await?;
        let path = self.layout.queue_path();
        let mut doc: QueueDocument = record::read_json(&path).unwrap_or_default();

        let (value, dirty) = apply(&mut doc)?;
        if dirty {
            doc.updated_at = Some(Utc::now());
            record::write_json(&path, &doc)?;
        }
        lock.release();
        Ok(value)
    }
}
