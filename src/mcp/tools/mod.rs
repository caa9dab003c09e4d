//! MCP tool handlers.

pub mod ask;
pub mod check_commands;
pub mod notify;
pub mod report_command_result;
pub mod util;
pub mod wait_for_response;
