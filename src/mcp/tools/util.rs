//! Shared utilities for MCP tool handlers.

use rmcp::model::{CallToolResult, Content};
use serde::de::DeserializeOwned;

use crate::mcp::handler::AppState;
use crate::store::SessionDocuments;
use crate::AppError;

/// Deserialize tool arguments into `T`.
///
/// # Errors
///
/// Returns `invalid_params` naming the tool when the arguments do not match.
pub fn parse_input<T: DeserializeOwned>(
    tool: &str,
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<T, rmcp::ErrorData> {
    serde_json::from_value(serde_json::Value::Object(arguments.unwrap_or_default())).map_err(
        |err| rmcp::ErrorData::invalid_params(format!("invalid {tool} parameters: {err}"), None),
    )
}

/// Map an application error onto an MCP error: caller mistakes become
/// `invalid_params`, everything else `internal_error`.
#[must_use]
pub fn to_error_data(err: &AppError) -> rmcp::ErrorData {
    match err {
        AppError::NotFound(_)
        | AppError::PathViolation(_)
        | AppError::InvalidTransition(_)
        | AppError::AmbiguousId(_)
        | AppError::QueueFull { .. } => rmcp::ErrorData::invalid_params(err.to_string(), None),
        _ => rmcp::ErrorData::internal_error(err.to_string(), None),
    }
}

/// Wrap a JSON value as a successful tool result.
///
/// # Errors
///
/// Returns `internal_error` if the value cannot be serialized.
pub fn json_result(value: serde_json::Value) -> Result<CallToolResult, rmcp::ErrorData> {
    let content = Content::json(value).map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to serialize response: {err}"), None)
    })?;
    Ok(CallToolResult::success(vec![content]))
}

/// Documents of the session owned by this server.
///
/// # Errors
///
/// Returns `internal_error` when no session is active.
pub async fn session_documents(state: &AppState) -> Result<SessionDocuments, rmcp::ErrorData> {
    state
        .registry
        .documents()
        .await
        .ok_or_else(|| rmcp::ErrorData::internal_error("no active session", None))
}
