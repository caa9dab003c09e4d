//! Command pickup used by the `check_commands` tool.

use std::time::Duration;

use agent_relay::mcp::tools::check_commands::{collect_commands, CommandsOutcome};
use agent_relay::models::command::{CommandDocument, CommandStatus};
use agent_relay::store::StorageLayout;
use tempfile::TempDir;

use super::test_helpers::{documents, write_session};

const INTERVAL: Duration = Duration::from_millis(20);

fn setup() -> (TempDir, agent_relay::store::SessionDocuments) {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path());
    write_session(&layout, "s1", 0);
    let docs = documents(&layout, "s1");
    (dir, docs)
}

#[tokio::test]
async fn zero_wait_with_nothing_pending_is_empty() {
    let (_dir, docs) = setup();
    let outcome = collect_commands(&docs, Duration::ZERO, INTERVAL).await.unwrap();
    assert_eq!(outcome, CommandsOutcome::Empty);
    assert_eq!(outcome.to_json()["status"], "empty");
}

#[tokio::test]
async fn elapsed_wait_reports_timeout() {
    let (_dir, docs) = setup();
    let outcome = collect_commands(&docs, Duration::from_millis(100), INTERVAL)
        .await
        .unwrap();
    assert_eq!(outcome, CommandsOutcome::TimedOut);
    let payload = outcome.to_json();
    assert_eq!(payload["status"], "timeout");
    assert_eq!(payload["commands"], serde_json::json!([]));
}

#[tokio::test]
async fn command_arriving_mid_wait_is_received_once() {
    let (_dir, docs) = setup();
    let writer = docs.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let command = CommandDocument::new("s1".into(), "run the tests".into(), "U_OK".into());
        writer.write_command(&command).unwrap();
    });

    let outcome = collect_commands(&docs, Duration::from_secs(5), INTERVAL)
        .await
        .unwrap();
    let CommandsOutcome::Received(commands) = &outcome else {
        panic!("expected commands, got {outcome:?}");
    };
    assert_eq!(commands.len(), 1);
    assert_eq!(outcome.to_json()["commands"][0]["text"], "run the tests");
    assert_eq!(
        docs.command(&commands[0].command_id).unwrap().status,
        CommandStatus::Acknowledged
    );

    let again = collect_commands(&docs, Duration::ZERO, INTERVAL).await.unwrap();
    assert_eq!(again, CommandsOutcome::Empty);
}
