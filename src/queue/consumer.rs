//! Periodic queue consumer: dequeue into free slots, clean up old jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::execution_queue::ExecutionQueue;
use crate::queue::supervisor::JobSupervisor;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// How long a running job may go without a recorded pid before it is
/// considered abandoned.
pub const PID_GRACE: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Dequeue until no slot or no queued job remains, starting one
/// supervised execution per dequeued job. Returns how many were started.
pub async fn consume_once(
    queue: &ExecutionQueue,
    supervisor: &Arc<JobSupervisor>,
    executions: &mut JoinSet<()>,
) -> usize {
    let mut started = 0;
    loop {
        match queue.dequeue().await {
            Ok(Some(job)) => {
                let supervisor = Arc::clone(supervisor);
                executions.spawn(async move {
                    supervisor.execute(job).await;
                });
                started += 1;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "dequeue failed");
                break;
            }
        }
    }
    started
}

/// Fail running jobs this supervisor does not own and whose process is
/// gone, freeing their concurrency slots. Returns how many were failed.
pub async fn reclaim_unsupervised(
    queue: &ExecutionQueue,
    supervisor: &JobSupervisor,
    grace: Duration,
) -> usize {
    let supervised = supervisor.running_job_ids().await;
    match queue.recover_unsupervised_jobs(&supervised, grace).await {
        Ok(recovered) => {
            for job in &recovered {
                info!(job_id = %job.id, pid = job.pid, "unsupervised job marked failed");
            }
            recovered.len()
        }
        Err(err) => {
            warn!(%err, "unsupervised job recovery failed");
            0
        }
    }
}

/// Spawn the consumer loop. On cancellation running jobs are stopped and
/// their executions given a short grace period to record the result.
#[must_use]
pub fn spawn_queue_consumer(
    queue: Arc<ExecutionQueue>,
    supervisor: Arc<JobSupervisor>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match queue.recover_orphaned_jobs().await {
            Ok(recovered) if !recovered.is_empty() => {
                info!(count = recovered.len(), "orphaned jobs marked failed");
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "orphan recovery failed"),
        }

        let mut executions = JoinSet::new();
        let mut ticker = tokio::time::interval(interval);
        let mut last_cleanup: Option<Instant> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(_) = executions.join_next(), if !executions.is_empty() => continue,
            }

            reclaim_unsupervised(&queue, &supervisor, PID_GRACE).await;
            consume_once(&queue, &supervisor, &mut executions).await;

            if last_cleanup.is_none_or(|at| at.elapsed() >= CLEANUP_INTERVAL) {
                match queue.cleanup().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "expired jobs removed"),
                    Err(err) => warn!(%err, "queue cleanup failed"),
                }
                last_cleanup = Some(Instant::now());
            }
        }

        info!("queue consumer shutting down");
        supervisor.stop_all().await;
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while executions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("job executions did not finish within the shutdown grace period");
            executions.abort_all();
        }
    })
}
