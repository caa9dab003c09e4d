//! `wait_for_response` MCP tool handler.
//!
//! Polls the session's `responses/` directory until an answer for the
//! question appears or the deadline passes. A timeout marks the question
//! expired so the poller stops offering it, and is reported as a typed
//! `"timeout"` result rather than an error.

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::mcp::handler::{AppState, RelayServer};
use crate::mcp::tools::util::{json_result, parse_input, session_documents, to_error_data};
use crate::models::question::{QuestionStatus, ResponseDocument};
use crate::models::session::SessionStatus;
use crate::store::{validate_id, SessionDocuments};
use crate::wait::{poll_until, WaitOutcome};

#[derive(Debug, serde::Deserialize)]
struct WaitForResponseInput {
    question_id: String,
    timeout_seconds: Option<u64>,
}

/// How a wait for an answer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// A response document was found.
    Answered(ResponseDocument),
    /// The question was closed without a response (expired elsewhere).
    Closed(QuestionStatus),
    /// The deadline passed; the question is now expired.
    TimedOut,
}

impl AnswerOutcome {
    /// JSON payload returned to the agent.
    #[must_use]
    pub fn to_json(&self, question_id: &str) -> serde_json::Value {
        match self {
            Self::Answered(response) => json!({
                "status": "answered",
                "question_id": question_id,
                "answer": response.answer,
                "responder": response.responder,
                "source": response.source,
            }),
            Self::Closed(status) => json!({
                "status": status,
                "question_id": question_id,
            }),
            Self::TimedOut => json!({
                "status": "timeout",
                "question_id": question_id,
            }),
        }
    }
}

/// Wait for an answer to `question_id`, marking the session `waiting` for
/// the duration and expiring the question on timeout.
///
/// # Errors
///
/// Returns `AppError::Io` only if expiring the question fails.
pub async fn await_answer(
    state: &AppState,
    documents: &SessionDocuments,
    question_id: &str,
    timeout: Duration,
) -> crate::Result<AnswerOutcome> {
    if let Some(response) = documents.response(question_id) {
        return Ok(AnswerOutcome::Answered(response));
    }

    let interval = Duration::from_millis(state.config.timeouts.poll_interval_ms);
    if let Err(err) = state.registry.set_status(SessionStatus::Waiting).await {
        warn!(%err, "failed to mark session waiting");
    }

    let outcome = poll_until(timeout, interval, || async {
        if let Some(response) = documents.response(question_id) {
            return Some(AnswerOutcome::Answered(response));
        }
        documents
            .question(question_id)
            .filter(|q| !q.is_pending())
            .map(|q| AnswerOutcome::Closed(q.status))
    })
    .await;

    if let Err(err) = state.registry.set_status(SessionStatus::Active).await {
        warn!(%err, "failed to mark session active");
    }

    match outcome {
        WaitOutcome::Ready(outcome) => Ok(outcome),
        WaitOutcome::TimedOut => {
            // Last look before expiring: an answer may have landed after the
            // final probe.
            if let Some(response) = documents.response(question_id) {
                return Ok(AnswerOutcome::Answered(response));
            }
            documents.expire_question(question_id)?;
            Ok(AnswerOutcome::TimedOut)
        }
    }
}

/// Handle the `wait_for_response` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` for unknown questions or storage failures.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: WaitForResponseInput = parse_input("wait_for_response", context.arguments)?;

    let span = info_span!("wait_for_response", question_id = %input.question_id);
    async move {
        validate_id(&input.question_id).map_err(|err| to_error_data(&err))?;
        let documents = session_documents(&state).await?;
        let question = documents.question(&input.question_id).ok_or_else(|| {
            rmcp::ErrorData::invalid_params(
                format!("question {} not found", input.question_id),
                None,
            )
        })?;

        let timeout = Duration::from_secs(
            input
                .timeout_seconds
                .unwrap_or(question.timeout_seconds),
        );
        let outcome = await_answer(&state, &documents, &input.question_id, timeout)
            .await
            .map_err(|err| to_error_data(&err))?;

        info!(outcome = ?outcome, "wait_for_response completed");
        json_result(outcome.to_json(&input.question_id))
    }
    .instrument(span)
    .await
}
