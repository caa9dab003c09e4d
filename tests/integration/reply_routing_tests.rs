//! Inbound routing of chat replies and answer buttons into session storage.

use agent_relay::models::command::CommandStatus;
use agent_relay::models::question::{QuestionDocument, QuestionStatus};
use agent_relay::models::DeliveryHandle;
use agent_relay::slack::blocks::answer_value;
use agent_relay::slack::events::{answer_from_button, route_thread_reply, ReplyRoute, SLACK_SOURCE};
use agent_relay::store::StorageLayout;
use agent_relay::AppError;
use tempfile::TempDir;

use super::test_helpers::{documents, write_session};

fn setup() -> (TempDir, StorageLayout) {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_session(&layout, "s1", 0);
    (dir, layout)
}

fn delivered_question(layout: &StorageLayout, text: &str) -> QuestionDocument {
    let mut question = QuestionDocument::new("s1".into(), text.into(), None, 60);
    question.delivery = Some(DeliveryHandle {
        channel_id: "C_TEST".into(),
        message_ts: "100.1".into(),
    });
    documents(layout, "s1").write_question(&question).unwrap();
    question
}

#[test]
fn reply_answers_the_delivered_pending_question() {
    let (_dir, layout) = setup();
    let question = delivered_question(&layout, "Which branch?");

    let route = route_thread_reply(&layout, "s1", "main", "U_OK").unwrap();
    let ReplyRoute::Answered { question: answered, response } = route else {
        panic!("reply should answer the question");
    };
    assert_eq!(answered.question_id, question.question_id);
    assert_eq!(response.answer, "main");
    assert_eq!(response.source, SLACK_SOURCE);
    assert_eq!(response.responder.as_deref(), Some("U_OK"));
    assert_eq!(
        documents(&layout, "s1")
            .question(&question.question_id)
            .unwrap()
            .status,
        QuestionStatus::Answered
    );
}

#[test]
fn reply_targets_the_latest_pending_question() {
    let (_dir, layout) = setup();
    let mut older = delivered_question(&layout, "First?");
    older.created_at -= chrono::Duration::seconds(30);
    documents(&layout, "s1").write_question(&older).unwrap();
    let newer = delivered_question(&layout, "Second?");

    let route = route_thread_reply(&layout, "s1", "ok", "U_OK").unwrap();
    assert!(matches!(
        route,
        ReplyRoute::Answered { ref question, .. } if question.question_id == newer.question_id
    ));
    assert!(documents(&layout, "s1")
        .question(&older.question_id)
        .unwrap()
        .is_pending());
}

#[test]
fn undelivered_question_does_not_capture_replies() {
    let (_dir, layout) = setup();
    let hidden = QuestionDocument::new("s1".into(), "Not posted yet".into(), None, 60);
    documents(&layout, "s1").write_question(&hidden).unwrap();

    let route = route_thread_reply(&layout, "s1", "run the tests", "U_OK").unwrap();
    assert!(matches!(route, ReplyRoute::Command(_)));
}

#[test]
fn reply_without_pending_question_becomes_a_command() {
    let (_dir, layout) = setup();

    let route = route_thread_reply(&layout, "s1", "cargo test", "U_OK").unwrap();
    let ReplyRoute::Command(command) = route else {
        panic!("reply should become a command");
    };
    assert_eq!(command.text, "cargo test");
    assert_eq!(command.requested_by, "U_OK");

    let stored = documents(&layout, "s1").commands();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CommandStatus::Pending);
}

#[test]
fn button_value_selects_the_option() {
    let (_dir, layout) = setup();
    let question = QuestionDocument::new(
        "s1".into(),
        "Deploy?".into(),
        Some(vec!["yes".into(), "no".into()]),
        60,
    );
    documents(&layout, "s1").write_question(&question).unwrap();

    let value = answer_value("s1", &question.question_id, 1);
    let (_, response) = answer_from_button(&layout, &value, "U_OK").unwrap();
    assert_eq!(response.answer, "no");

    let again = answer_from_button(&layout, &value, "U_OTHER").unwrap_err();
    assert!(matches!(again, AppError::InvalidTransition(_)));
}

#[test]
fn button_with_bad_index_or_value_is_rejected() {
    let (_dir, layout) = setup();
    let question = QuestionDocument::new(
        "s1".into(),
        "Deploy?".into(),
        Some(vec!["yes".into()]),
        60,
    );
    documents(&layout, "s1").write_question(&question).unwrap();

    let out_of_range = answer_value("s1", &question.question_id, 7);
    assert!(matches!(
        answer_from_button(&layout, &out_of_range, "U_OK"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        answer_from_button(&layout, "garbage", "U_OK"),
        Err(AppError::PathViolation(_))
    ));
    assert!(matches!(
        answer_from_button(&layout, "../q/0", "U_OK"),
        Err(AppError::PathViolation(_))
    ));
}
