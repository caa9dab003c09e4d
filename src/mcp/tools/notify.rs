//! `notify` MCP tool handler.
//!
//! Writes a notification document; delivery happens on the poller's next
//! tick, so the call returns immediately.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde_json::json;
use tracing::{info, info_span, Instrument};

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::util::{json_result, parse_input, session_documents, to_error_data};
use crate::models::notification::{NotificationDocument, NotificationLevel};

#[derive(Debug, serde::Deserialize)]
struct NotifyInput {
    message: String,
    #[serde(default)]
    level: NotificationLevel,
}

/// Handle the `notify` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` on validation or storage failures.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: NotifyInput = parse_input("notify", context.arguments)?;

    let span = info_span!("notify", level = input.level.as_str());
    async move {
        if input.message.trim().is_empty() {
            return Err(rmcp::ErrorData::invalid_params(
                "message must not be empty",
                None,
            ));
        }

        let documents = session_documents(&state).await?;
        let notification = NotificationDocument::new(
            documents.session_id().to_owned(),
            input.message,
            input.level,
        );
        documents
            .write_notification(&notification)
            .map_err(|err| to_error_data(&err))?;

        info!(notification_id = %notification.notification_id, "notification written");
        json_result(json!({
            "status": "queued",
            "notification_id": notification.notification_id,
        }))
    }
    .instrument(span)
    .await
}
