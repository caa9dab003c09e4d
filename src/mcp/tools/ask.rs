//! `ask` MCP tool handler.
//!
//! Writes a question document for the poller to deliver. With `wait`
//! set, blocks like `wait_for_response`; otherwise returns the id at once.

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde_json::json;
use tracing::{info, info_span, Instrument};

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::util::{json_result, parse_input, session_documents, to_error_data};
use crate::mcp::tools::wait_for_response::await_answer;
use crate::models::question::QuestionDocument;

#[derive(Debug, serde::Deserialize)]
struct AskInput {
    question: String,
    #[serde(default)]
    options: Option<Vec<String>>,
    #[serde(default)]
    wait: bool,
    timeout_seconds: Option<u64>,
}

/// Handle the `ask` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on validation or storage failures.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: AskInput = parse_input("ask", context.arguments)?;

    let span = info_span!(
        "ask",
        wait = input.wait,
        options = input.options.as_ref().map_or(0, Vec::len),
    );
    async move {
        if input.question.trim().is_empty() {
            return Err(rmcp::ErrorData::invalid_params(
                "question must not be empty",
                None,
            ));
        }

        let documents = session_documents(&state).await?;
        let timeout_seconds = input
            .timeout_seconds
            .unwrap_or(state.config.timeouts.response_seconds);
        let question = QuestionDocument::new(
            documents.session_id().to_owned(),
            input.question,
            input.options,
            timeout_seconds,
        );
        documents
            .write_question(&question)
            .map_err(|err| to_error_data(&err))?;
        info!(question_id = %question.question_id, "question written");

        if !input.wait {
            return json_result(json!({
                "status": "pending",
                "question_id": question.question_id,
            }));
        }

        let outcome = await_answer(
            &state,
            &documents,
            &question.question_id,
            Duration::from_secs(timeout_seconds),
        )
        .await
        .map_err(|err| to_error_data(&err))?;
        json_result(outcome.to_json(&question.question_id))
    }
    .instrument(span)
    .await
}
