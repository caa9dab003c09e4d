//! Job execution through a real child process (`sh -c <prompt>`).
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use agent_relay::models::job::{EnqueueOptions, Job, JobStatus, QueueDocument};
use agent_relay::notifier::Notifier;
use agent_relay::queue::consumer::reclaim_unsupervised;
use agent_relay::queue::process::pid_alive;
use agent_relay::queue::{ExecutionQueue, JobSupervisor, QueueLimits, SupervisorConfig};
use agent_relay::store::{record, StorageLayout};
use tempfile::TempDir;

use super::test_helpers::{test_config, RecordingNotifier};

struct Harness {
    dir: TempDir,
    queue: Arc<ExecutionQueue>,
    notifier: Arc<RecordingNotifier>,
    supervisor: Arc<JobSupervisor>,
}

fn harness(timeout: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let queue = Arc::new(ExecutionQueue::new(
        config.layout(),
        QueueLimits::from(&config.queue),
    ));
    let notifier = RecordingNotifier::new();
    let mut launch = SupervisorConfig::from_config(&config);
    launch.working_dir = dir.path().to_path_buf();
    launch.timeout = timeout;
    let supervisor = Arc::new(JobSupervisor::new(
        Arc::clone(&queue),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        launch,
    ));
    Harness {
        dir,
        queue,
        notifier,
        supervisor,
    }
}

async fn run(h: &Harness, script: &str) -> agent_relay::models::job::Job {
    h.queue
        .enqueue(script, "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.queue.dequeue().await.unwrap().expect("job dequeued");
    h.supervisor.execute(job).await.expect("job recorded")
}

#[tokio::test]
async fn successful_job_captures_stdout() {
    let h = harness(Duration::from_secs(10));
    let job = run(&h, "echo relay-ok").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.exit_code, Some(0));
    assert!(job.result.as_deref().unwrap_or_default().contains("relay-ok"));
    assert!(job.pid.is_some());
    assert!(job.duration_ms.is_some());
    assert!(h.supervisor.running_job_ids().await.is_empty());

    let notices = h.notifier.deliveries();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.text.contains("completed"));
}

#[tokio::test]
async fn non_zero_exit_fails_with_stderr() {
    let h = harness(Duration::from_secs(10));
    let job = run(&h, "echo broken >&2; exit 3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(3));
    let error = job.error.unwrap_or_default();
    assert!(error.contains("exited with code 3"), "{error}");
    assert!(error.contains("broken"), "{error}");
}

#[tokio::test]
async fn slow_job_times_out() {
    let h = harness(Duration::from_millis(300));
    let job = run(&h, "sleep 5").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap_or_default().contains("timed out"));
    assert!(job.duration_ms.unwrap_or(u64::MAX) < 5_000);
}

#[tokio::test]
async fn missing_binary_fails_the_job() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let queue = Arc::new(ExecutionQueue::new(
        config.layout(),
        QueueLimits::from(&config.queue),
    ));
    let mut launch = SupervisorConfig::from_config(&config);
    launch.host_cli = "/nonexistent/agent-cli".into();
    launch.working_dir = dir.path().to_path_buf();
    let notifier: Arc<dyn Notifier> = RecordingNotifier::new();
    let supervisor = JobSupervisor::new(Arc::clone(&queue), notifier, launch);

    queue
        .enqueue("anything", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = queue.dequeue().await.unwrap().unwrap();
    let job = supervisor.execute(job).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap_or_default().starts_with("spawn failed"));
}

#[tokio::test]
async fn cancelled_job_result_is_discarded() {
    let h = harness(Duration::from_secs(10));
    h.queue
        .enqueue("sleep 5", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.queue.dequeue().await.unwrap().unwrap();
    let job_id = job.id.clone();

    let queue = Arc::clone(&h.queue);
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.cancel_job_by_id(&job_id).await
    });

    let outcome = h.supervisor.execute(job).await;
    let cancelled = canceller.await.unwrap().unwrap().expect("job was running");

    assert!(outcome.is_none());
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(
        h.queue.get_by_prefix(&cancelled.id).unwrap().status,
        JobStatus::Cancelled
    );

    let notices = h.notifier.deliveries();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.text.contains("cancelled"), "{}", notices[0].1.text);
}

#[tokio::test]
async fn job_cancelled_before_start_never_runs() {
    let h = harness(Duration::from_secs(10));
    let marker = h.dir.path().join("marker");
    h.queue
        .enqueue("echo ran > marker", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.queue.dequeue().await.unwrap().unwrap();
    let cancelled = h.queue.cancel_job_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.pid.is_none());

    assert!(h.supervisor.execute(job).await.is_none());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!marker.exists());
    assert!(h.supervisor.running_job_ids().await.is_empty());
    let notices = h.notifier.deliveries();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.text.contains("cancelled"));
}

async fn wait_for_pid(queue: &ExecutionQueue, job_id: &str) -> u32 {
    for _ in 0..250 {
        if let Some(pid) = queue.get(job_id).and_then(|job| job.pid) {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pid for {job_id} was never recorded");
}

#[tokio::test]
async fn stop_all_stops_running_jobs_and_kills_them() {
    let h = harness(Duration::from_secs(60));
    h.queue
        .enqueue("sleep 30", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.queue.dequeue().await.unwrap().unwrap();
    let job_id = job.id.clone();

    let execution = {
        let supervisor = Arc::clone(&h.supervisor);
        tokio::spawn(async move { supervisor.execute(job).await })
    };
    let pid = wait_for_pid(&h.queue, &job_id).await;
    assert!(pid_alive(pid));

    h.supervisor.stop_all().await;
    let outcome = tokio::time::timeout(Duration::from_secs(10), execution)
        .await
        .expect("execution ends after stop")
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(h.queue.get(&job_id).unwrap().status, JobStatus::Stopped);
    assert!(!pid_alive(pid));
    assert!(h.supervisor.running_job_ids().await.is_empty());
    assert!(h
        .notifier
        .deliveries()
        .iter()
        .any(|(_, message)| message.text.contains("stopped")));
}

// ── Unsupervised jobs ────────────────────────────────────────────────

fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

fn running_job(id: &str, pid: Option<u32>) -> Job {
    let mut job = Job::new(format!("prompt {id}"), "U_OK".into());
    job.id = id.into();
    job.status = JobStatus::Running;
    job.started_at = Some(chrono::Utc::now());
    job.pid = pid;
    job
}

#[tokio::test]
async fn consumer_tick_reclaims_jobs_left_by_a_lost_supervisor() {
    let h = harness(Duration::from_secs(10));
    let mut queued = Job::new("next".into(), "U_OK".into());
    queued.id = "queued1".into();
    let doc = QueueDocument {
        jobs: vec![
            running_job("exited1", Some(dead_pid())),
            running_job("starting1", None),
            queued,
        ],
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(h.dir.path()).queue_path(), &doc).unwrap();

    let grace = Duration::from_secs(60);
    assert_eq!(reclaim_unsupervised(&h.queue, &h.supervisor, grace).await, 1);
    let exited = h.queue.get("exited1").unwrap();
    assert_eq!(exited.status, JobStatus::Failed);
    assert_eq!(exited.error.as_deref(), Some("supervisor lost"));
    assert_eq!(h.queue.get("starting1").unwrap().status, JobStatus::Running);
    assert!(h.queue.dequeue().await.unwrap().is_none());

    assert_eq!(
        reclaim_unsupervised(&h.queue, &h.supervisor, Duration::ZERO).await,
        1
    );
    assert_eq!(h.queue.get("starting1").unwrap().status, JobStatus::Failed);
    let next = h.queue.dequeue().await.unwrap().expect("slot freed");
    assert_eq!(next.id, "queued1");
}

#[tokio::test]
async fn supervised_jobs_are_never_reclaimed() {
    let h = harness(Duration::from_secs(60));
    h.queue
        .enqueue("sleep 30", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    let job = h.queue.dequeue().await.unwrap().unwrap();
    let job_id = job.id.clone();
    let execution = {
        let supervisor = Arc::clone(&h.supervisor);
        tokio::spawn(async move { supervisor.execute(job).await })
    };
    wait_for_pid(&h.queue, &job_id).await;

    assert_eq!(
        reclaim_unsupervised(&h.queue, &h.supervisor, Duration::ZERO).await,
        0
    );
    assert_eq!(h.queue.get(&job_id).unwrap().status, JobStatus::Running);

    h.supervisor.stop_all().await;
    tokio::time::timeout(Duration::from_secs(10), execution)
        .await
        .expect("execution ends after stop")
        .unwrap();
}
