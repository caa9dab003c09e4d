//! MCP server handler, shared application state, and tool router.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::{info_span, Instrument};

use crate::config::GlobalConfig;
use crate::mcp::tools;
use crate::registry::SessionRegistry;

/// Names of the tools exposed over MCP.
pub const TOOL_NAMES: [&str; 5] = [
    "ask",
    "notify",
    "wait_for_response",
    "check_commands",
    "report_command_result",
];

/// Shared application state accessible by all MCP tool handlers.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Registry owning this process's session.
    pub registry: Arc<SessionRegistry>,
}

/// MCP server exposing the session-scoped relay tools.
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a new MCP server bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            let name = tool.name.to_string();
            match name.as_str() {
                "ask" => router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(tools::ask::handle(context))
                })),
                "notify" => router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(tools::notify::handle(context))
                })),
                "wait_for_response" => router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(tools::wait_for_response::handle(context))
                })),
                "check_commands" => router.add_route(ToolRoute::new_dyn(tool, |context| {
                    Box::pin(tools::check_commands::handle(context))
                })),
                "report_command_result" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(tools::report_command_result::handle(context))
                    }));
                }
                _ => router.add_route(ToolRoute::new_dyn(tool, |_context| {
                    Box::pin(async {
                        Err(rmcp::ErrorData::internal_error("tool not implemented", None))
                    })
                })),
            }
        }

        router
    }

    /// Convert a `serde_json::Value::Object` into the map expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    /// Tool definitions advertised by `list_tools`.
    #[must_use]
    pub fn all_tools() -> Vec<Tool> {
        vec![
            Tool::new(
                "ask",
                "Ask the human operator a question. Optionally blocks until an answer \
                 arrives or the timeout elapses; otherwise returns the question_id for \
                 a later wait_for_response.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "options": { "type": "array", "items": { "type": "string" } },
                        "wait": { "type": "boolean", "default": false },
                        "timeout_seconds": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["question"]
                })),
            ),
            Tool::new(
                "notify",
                "Send a one-way status message to the operator. Returns immediately.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" },
                        "level": {
                            "type": "string",
                            "enum": ["info", "success", "warning", "error"],
                            "default": "info"
                        }
                    },
                    "required": ["message"]
                })),
            ),
            Tool::new(
                "wait_for_response",
                "Block until the operator answers a previously asked question. On \
                 timeout the question is marked expired and status \"timeout\" is returned.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "question_id": { "type": "string" },
                        "timeout_seconds": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["question_id"]
                })),
            ),
            Tool::new(
                "check_commands",
                "Fetch commands the operator sent to this session. Each command is \
                 returned once. Optionally waits for the first command to arrive.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "wait_seconds": { "type": "integer", "minimum": 0 }
                    }
                })),
            ),
            Tool::new(
                "report_command_result",
                "Report the outcome of a command received through check_commands.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command_id": { "type": "string" },
                        "output": { "type": "string" },
                        "success": { "type": "boolean", "default": true }
                    },
                    "required": ["command_id", "output"]
                })),
            ),
        ]
    }
}

impl ServerHandler for RelayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::from_build_env()
            },
            instructions: Some(
                "Relays questions, notifications and commands between this agent session \
                 and a human operator."
                    .into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let span = info_span!("call_tool", tool = %request.name);

        async move {
            self.state.registry.record_activity().await;
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
        .instrument(span)
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::all_tools())))
    }
}
