//! Execution queue behaviour across handles sharing one storage root.

use std::sync::Arc;

use agent_relay::models::job::{EnqueueOptions, Job, JobStatus, QueueDocument};
use agent_relay::queue::{ExecutionQueue, JobOutcome, QueueLimits};
use agent_relay::store::{record, StorageLayout};
use agent_relay::AppError;
use tempfile::TempDir;

use super::test_helpers::test_config;

fn queue(dir: &TempDir) -> ExecutionQueue {
    let config = test_config(dir.path());
    ExecutionQueue::new(config.layout(), QueueLimits::from(&config.queue))
}

fn seeded_job(id: &str, status: JobStatus) -> Job {
    let mut job = Job::new(format!("prompt {id}"), "U_OK".into());
    job.id = id.into();
    job.status = status;
    job
}

#[tokio::test]
async fn sixth_enqueue_is_rejected_when_five_are_active() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    for n in 0..5 {
        queue
            .enqueue(&format!("job {n}"), "U_OK", EnqueueOptions::default())
            .await
            .expect("room in queue");
    }

    let err = queue
        .enqueue("one too many", "U_OK", EnqueueOptions::default())
        .await
        .expect_err("queue is full");
    assert!(matches!(err, AppError::QueueFull { active: 5, max: 5 }));
    assert_eq!(err.to_string(), "Queue is full (5/5)");
    assert_eq!(queue.list().len(), 5);
}

#[tokio::test]
async fn terminal_jobs_do_not_count_against_the_limit() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let doc = QueueDocument {
        jobs: (0..5)
            .map(|n| seeded_job(&format!("done{n}"), JobStatus::Completed))
            .collect(),
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(dir.path()).queue_path(), &doc).unwrap();

    queue
        .enqueue("fresh", "U_OK", EnqueueOptions::default())
        .await
        .expect("completed jobs are not active");
}

#[tokio::test]
async fn dequeue_returns_none_at_concurrency_limit() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    queue
        .enqueue("first", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    queue
        .enqueue("second", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();

    let running = queue.dequeue().await.unwrap().expect("first job starts");
    assert_eq!(running.prompt, "first");
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    assert!(queue.dequeue().await.unwrap().is_none());
    let statuses: Vec<JobStatus> = queue.list().iter().map(|j| j.status).collect();
    assert_eq!(statuses, vec![JobStatus::Running, JobStatus::Queued]);
}

#[tokio::test]
async fn dequeue_on_empty_queue_is_none() {
    let dir = TempDir::new().unwrap();
    assert!(queue(&dir).dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn ambiguous_prefix_cancels_nothing() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let doc = QueueDocument {
        jobs: vec![
            seeded_job("abc111", JobStatus::Queued),
            seeded_job("abc222", JobStatus::Queued),
        ],
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(dir.path()).queue_path(), &doc).unwrap();

    assert!(queue.cancel_job_by_id("abc").await.unwrap().is_none());
    assert!(queue.list().iter().all(|j| j.status == JobStatus::Queued));
    assert!(matches!(
        queue.get_by_prefix("abc"),
        Err(AppError::AmbiguousId(_))
    ));
}

#[tokio::test]
async fn unique_prefix_cancels_queued_job() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let doc = QueueDocument {
        jobs: vec![
            seeded_job("abc111", JobStatus::Queued),
            seeded_job("def222", JobStatus::Queued),
        ],
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(dir.path()).queue_path(), &doc).unwrap();

    let cancelled = queue.cancel_job_by_id("def").await.unwrap().expect("unique");
    assert_eq!(cancelled.id, "def222");
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.finished_at.is_some());
    assert!(queue.cancel_job_by_id("def").await.unwrap().is_none());
}

#[tokio::test]
async fn finish_refuses_cancelled_job() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let job = queue
        .enqueue("work", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    queue.dequeue().await.unwrap();
    queue.cancel_job_by_id(&job.id).await.unwrap();

    let finished = queue
        .finish_job(&job.id, JobStatus::Completed, JobOutcome::default())
        .await
        .unwrap();
    assert!(finished.is_none());
    assert_eq!(queue.get_by_prefix(&job.id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn orphaned_running_jobs_are_failed() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let mut orphan = seeded_job("orphan1", JobStatus::Running);
    orphan.pid = None;
    let doc = QueueDocument {
        jobs: vec![orphan, seeded_job("waiting1", JobStatus::Queued)],
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(dir.path()).queue_path(), &doc).unwrap();

    let recovered = queue.recover_orphaned_jobs().await.unwrap();
    assert_eq!(recovered.len(), 1);
    let job = queue.get_by_prefix("orphan1").unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("supervisor lost"));
    assert_eq!(
        queue.get_by_prefix("waiting1").unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn cleanup_drops_only_old_terminal_jobs() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let mut old = seeded_job("old1", JobStatus::Completed);
    old.finished_at = Some(chrono::Utc::now() - chrono::Duration::hours(48));
    let mut recent = seeded_job("recent1", JobStatus::Failed);
    recent.finished_at = Some(chrono::Utc::now());
    let doc = QueueDocument {
        jobs: vec![old, recent, seeded_job("queued1", JobStatus::Queued)],
        updated_at: None,
    };
    record::write_json(&StorageLayout::new(dir.path()).queue_path(), &doc).unwrap();

    assert_eq!(queue.cleanup().await.unwrap(), 1);
    let ids: Vec<String> = queue.list().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec!["recent1", "queued1"]);
}

#[tokio::test]
async fn concurrent_enqueues_never_exceed_the_limit() {
    let dir = TempDir::new().unwrap();
    let queue = Arc::new(queue(&dir));

    let mut handles = Vec::new();
    for n in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue
                .enqueue(&format!("job {n}"), "U_OK", EnqueueOptions::default())
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AppError::QueueFull { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(queue.list().len(), 5);
}

#[tokio::test]
async fn set_pid_reports_whether_the_job_is_still_running() {
    let dir = TempDir::new().unwrap();
    let queue = queue(&dir);
    let first = queue
        .enqueue("first", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    queue.dequeue().await.unwrap();
    assert!(queue.set_pid(&first.id, 4242).await.unwrap());
    assert_eq!(queue.get(&first.id).unwrap().pid, Some(4242));

    queue
        .finish_job(&first.id, JobStatus::Completed, JobOutcome::default())
        .await
        .unwrap();
    let second = queue
        .enqueue("second", "U_OK", EnqueueOptions::default())
        .await
        .unwrap();
    queue.dequeue().await.unwrap();
    queue.cancel_job_by_id(&second.id).await.unwrap();

    assert!(!queue.set_pid(&second.id, 4343).await.unwrap());
    assert!(queue.get(&second.id).unwrap().pid.is_none());
    assert!(!queue.set_pid("missing", 1).await.unwrap());
}
