//! Blocking waits used by the `ask` and `wait_for_response` tools.

use std::sync::Arc;
use std::time::Duration;

use agent_relay::mcp::handler::AppState;
use agent_relay::mcp::tools::wait_for_response::{await_answer, AnswerOutcome};
use agent_relay::models::question::{QuestionDocument, QuestionStatus};
use agent_relay::models::session::SessionStatus;
use agent_relay::registry::resolver::read_session;
use agent_relay::registry::{HeartbeatOptions, SessionRegistry};
use agent_relay::store::SessionDocuments;
use tempfile::TempDir;

use super::test_helpers::test_config;

struct Fixture {
    dir: TempDir,
    state: AppState,
    documents: SessionDocuments,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(&dir.path().join("root")));
    let registry = Arc::new(SessionRegistry::new(
        config.layout(),
        HeartbeatOptions::from(&config.heartbeat),
    ));
    registry.create_session(dir.path()).await.unwrap();
    let documents = registry.documents().await.expect("session owned");
    Fixture {
        dir,
        state: AppState { config, registry },
        documents,
    }
}

fn ask(documents: &SessionDocuments) -> QuestionDocument {
    let question = QuestionDocument::new(
        documents.session_id().to_owned(),
        "Proceed?".into(),
        None,
        60,
    );
    documents.write_question(&question).unwrap();
    question
}

#[tokio::test]
async fn answer_arriving_mid_wait_is_returned() {
    let f = fixture().await;
    let question = ask(&f.documents);

    let writer = f.documents.clone();
    let qid = question.question_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        writer.record_response(&qid, "go ahead", Some("U_OK"), "slack")
    });

    let outcome = await_answer(&f.state, &f.documents, &question.question_id, Duration::from_secs(5))
        .await
        .unwrap();
    let AnswerOutcome::Answered(response) = &outcome else {
        panic!("expected an answer, got {outcome:?}");
    };
    assert_eq!(response.answer, "go ahead");
    assert_eq!(outcome.to_json(&question.question_id)["status"], "answered");

    let session = f.state.registry.session().await.unwrap();
    let on_disk = read_session(&f.state.config.layout(), &session.session_id).unwrap();
    assert_eq!(on_disk.status, SessionStatus::Active);

    f.state.registry.terminate_session("test over").await;
    drop(f.dir);
}

#[tokio::test]
async fn timeout_expires_the_question() {
    let f = fixture().await;
    let question = ask(&f.documents);

    let outcome = await_answer(
        &f.state,
        &f.documents,
        &question.question_id,
        Duration::from_millis(200),
    )
    .await
    .unwrap();

    assert_eq!(outcome, AnswerOutcome::TimedOut);
    assert_eq!(outcome.to_json(&question.question_id)["status"], "timeout");
    assert_eq!(
        f.documents.question(&question.question_id).unwrap().status,
        QuestionStatus::Expired
    );

    f.state.registry.terminate_session("test over").await;
}

#[tokio::test]
async fn existing_answer_returns_immediately() {
    let f = fixture().await;
    let question = ask(&f.documents);
    f.documents
        .record_response(&question.question_id, "already", None, "ctl")
        .unwrap();

    let outcome = await_answer(
        &f.state,
        &f.documents,
        &question.question_id,
        Duration::from_millis(1),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, AnswerOutcome::Answered(r) if r.answer == "already"));

    f.state.registry.terminate_session("test over").await;
}

#[tokio::test]
async fn question_expired_elsewhere_ends_the_wait() {
    let f = fixture().await;
    let question = ask(&f.documents);
    f.documents.expire_question(&question.question_id).unwrap();

    let outcome = await_answer(
        &f.state,
        &f.documents,
        &question.question_id,
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(outcome, AnswerOutcome::Closed(QuestionStatus::Expired));
    assert_eq!(outcome.to_json(&question.question_id)["status"], "expired");

    f.state.registry.terminate_session("test over").await;
}

#[tokio::test]
async fn maximum_timeout_waits_for_the_answer_and_restores_status() {
    let f = fixture().await;
    let question = ask(&f.documents);

    let writer = f.documents.clone();
    let qid = question.question_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.record_response(&qid, "yes", Some("U_OK"), "slack")
    });

    let outcome = await_answer(
        &f.state,
        &f.documents,
        &question.question_id,
        Duration::from_secs(u64::MAX),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, AnswerOutcome::Answered(_)), "got {outcome:?}");

    let session = f.state.registry.session().await.unwrap();
    let on_disk = read_session(&f.state.config.layout(), &session.session_id).unwrap();
    assert_eq!(on_disk.status, SessionStatus::Active);

    f.state.registry.terminate_session("test over").await;
    drop(f.dir);
}
