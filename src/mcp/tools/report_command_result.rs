//! `report_command_result` MCP tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use serde_json::json;
use tracing::{info, info_span, Instrument};

use crate::mcp::handler::RelayServer;
use crate::mcp::tools::util::{json_result, parse_input, session_documents, to_error_data};

#[derive(Debug, serde::Deserialize)]
struct ReportCommandResultInput {
    command_id: String,
    output: String,
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

/// Handle the `report_command_result` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` for unknown commands or storage failures.
pub async fn handle(
    context: ToolCallContext<'_, RelayServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: ReportCommandResultInput =
        parse_input("report_command_result", context.arguments)?;

    let span = info_span!(
        "report_command_result",
        command_id = %input.command_id,
        success = input.success,
    );
    async move {
        let documents = session_documents(&state).await?;
        if documents.command(&input.command_id).is_none() {
            return Err(rmcp::ErrorData::invalid_params(
                format!("command {} not found", input.command_id),
                None,
            ));
        }

        let result = documents
            .write_command_result(&input.command_id, &input.output, input.success)
            .map_err(|err| to_error_data(&err))?;

        info!("command result written");
        json_result(json!({
            "status": "recorded",
            "command_id": result.command_id,
        }))
    }
    .instrument(span)
    .await
}
