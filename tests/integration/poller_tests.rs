//! Change poller delivery: thread creation, question delay, dedup and retry.

use std::sync::Arc;
use std::time::Duration;

use agent_relay::models::command::CommandDocument;
use agent_relay::models::notification::{NotificationDocument, NotificationLevel};
use agent_relay::models::question::QuestionDocument;
use agent_relay::notifier::{DeliveryTarget, MessageKind, Notifier};
use agent_relay::poller::{ChangePoller, PollerOptions, ThreadDirectory};
use agent_relay::registry::resolver::read_session;
use agent_relay::store::StorageLayout;
use tempfile::TempDir;

use super::test_helpers::{documents, write_session, RecordingNotifier};

fn poller(layout: &StorageLayout, notifier: &Arc<RecordingNotifier>, delay: Duration) -> ChangePoller {
    ChangePoller::new(
        layout.clone(),
        Arc::clone(notifier) as Arc<dyn Notifier>,
        ThreadDirectory::new(),
        PollerOptions {
            interval: Duration::from_millis(50),
            question_delay: delay,
        },
    )
}

fn setup() -> (TempDir, StorageLayout, Arc<RecordingNotifier>) {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_session(&layout, "s1", 0);
    (dir, layout, RecordingNotifier::new())
}

#[tokio::test]
async fn first_tick_creates_the_session_thread_once() {
    let (_dir, layout, notifier) = setup();
    let poller = poller(&layout, &notifier, Duration::ZERO);

    poller.tick().await;
    poller.tick().await;

    let roots: Vec<_> = notifier
        .deliveries()
        .into_iter()
        .filter(|(target, _)| *target == DeliveryTarget::Channel)
        .collect();
    assert_eq!(roots.len(), 1);
    assert!(matches!(
        &roots[0].1.kind,
        MessageKind::SessionThread { session_id } if session_id == "s1"
    ));

    let thread = read_session(&layout, "s1").unwrap().thread.expect("thread recorded");
    assert_eq!(
        poller
            .threads()
            .session_for(&thread.channel_id, &thread.thread_ts)
            .await
            .as_deref(),
        Some("s1")
    );
}

#[tokio::test]
async fn notifications_are_delivered_exactly_once() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let note = NotificationDocument::new("s1".into(), "build green".into(), NotificationLevel::Success);
    docs.write_notification(&note).unwrap();

    let first = poller(&layout, &notifier, Duration::ZERO);
    let report = first.tick().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(first.tick().await.delivered, 0);

    let restarted = poller(&layout, &notifier, Duration::ZERO);
    assert_eq!(restarted.tick().await.delivered, 0);

    let thread = read_session(&layout, "s1").unwrap().thread.unwrap();
    assert_eq!(notifier.thread_texts(&thread), vec!["build green".to_owned()]);
    assert!(docs.notifications()[0].delivery.is_some());
}

#[tokio::test]
async fn question_is_withheld_inside_the_delay() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let question = QuestionDocument::new("s1".into(), "Merge?".into(), None, 60);
    docs.write_question(&question).unwrap();

    let poller = poller(&layout, &notifier, Duration::from_secs(30));
    let report = poller.tick().await;

    assert_eq!(report.withheld, 1);
    assert_eq!(report.delivered, 0);
    assert!(docs.question(&question.question_id).unwrap().delivery.is_none());
}

#[tokio::test]
async fn question_answered_before_delay_is_never_posted() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let question = QuestionDocument::new("s1".into(), "Merge?".into(), None, 60);
    docs.write_question(&question).unwrap();

    let poller = poller(&layout, &notifier, Duration::from_secs(30));
    assert_eq!(poller.tick().await.withheld, 1);

    docs.record_response(&question.question_id, "yes", None, "ctl")
        .unwrap();
    docs.update_question(&question.question_id, |q| {
        q.created_at -= chrono::Duration::seconds(60);
        true
    })
    .unwrap();

    let report = poller.tick().await;
    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 0);
    assert!(notifier
        .deliveries()
        .iter()
        .all(|(_, m)| !matches!(m.kind, MessageKind::Question { .. })));
}

#[tokio::test]
async fn pending_question_past_delay_is_posted_with_options() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let question = QuestionDocument::new(
        "s1".into(),
        "Deploy to prod?".into(),
        Some(vec!["yes".into(), "no".into()]),
        60,
    );
    docs.write_question(&question).unwrap();

    let report = poller(&layout, &notifier, Duration::ZERO).tick().await;
    assert_eq!(report.delivered, 1);

    let posted = notifier
        .deliveries()
        .into_iter()
        .find_map(|(_, m)| match m.kind {
            MessageKind::Question {
                question_id,
                options,
                ..
            } => Some((question_id, options)),
            _ => None,
        })
        .expect("question posted");
    assert_eq!(posted.0, question.question_id);
    assert_eq!(posted.1, vec!["yes".to_owned(), "no".to_owned()]);
    assert!(docs.question(&question.question_id).unwrap().delivery.is_some());
}

#[tokio::test]
async fn failed_delivery_is_retried_next_tick() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    docs.write_notification(&NotificationDocument::new(
        "s1".into(),
        "tests failed".into(),
        NotificationLevel::Error,
    ))
    .unwrap();

    let poller = poller(&layout, &notifier, Duration::ZERO);
    notifier.set_failing(true);
    let report = poller.tick().await;
    assert!(report.failed >= 1);
    assert_eq!(report.delivered, 0);
    assert!(read_session(&layout, "s1").unwrap().thread.is_none());

    notifier.set_failing(false);
    let report = poller.tick().await;
    assert_eq!(report.delivered, 1);
    assert!(docs.notifications()[0].delivery.is_some());
}

#[tokio::test]
async fn command_results_quote_the_command() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let command = CommandDocument::new("s1".into(), "git status".into(), "U_OK".into());
    docs.write_command(&command).unwrap();
    docs.write_command_result(&command.command_id, "nothing to commit", true)
        .unwrap();

    poller(&layout, &notifier, Duration::ZERO).tick().await;

    let thread = read_session(&layout, "s1").unwrap().thread.unwrap();
    let texts = notifier.thread_texts(&thread);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("git status"));
    assert!(texts[0].contains("nothing to commit"));
}

#[tokio::test]
async fn terminated_sessions_are_not_polled() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    docs.update_meta(|meta| meta.terminate("done", chrono::Utc::now()))
        .unwrap();
    docs.write_notification(&NotificationDocument::new(
        "s1".into(),
        "late".into(),
        NotificationLevel::Info,
    ))
    .unwrap();

    let report = poller(&layout, &notifier, Duration::ZERO).tick().await;
    assert_eq!(report.sessions, 0);
    assert!(notifier.deliveries().is_empty());
}

#[tokio::test]
async fn overlapping_tick_is_skipped_not_queued() {
    let (_dir, layout, notifier) = setup();
    let docs = documents(&layout, "s1");
    let note = NotificationDocument::new("s1".into(), "slow send".into(), NotificationLevel::Info);
    docs.write_notification(&note).unwrap();
    notifier.set_delay(Duration::from_millis(300));

    let poller = Arc::new(poller(&layout, &notifier, Duration::ZERO));
    let running = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.tick().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let overlapping = poller.tick().await;
    assert!(overlapping.skipped);
    assert_eq!(overlapping.sessions, 0);
    assert_eq!(overlapping.delivered, 0);

    let first = running.await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.delivered, 1);

    notifier.set_delay(Duration::ZERO);
    let next = poller.tick().await;
    assert!(!next.skipped);
    assert_eq!(next.delivered, 0);
    let thread = read_session(&layout, "s1").unwrap().thread.unwrap();
    assert_eq!(notifier.thread_texts(&thread), vec!["slow send".to_owned()]);
}
