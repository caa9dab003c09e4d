#![forbid(unsafe_code)]

//! Filesystem-mediated coordination between a CLI agent, a chat bot, and
//! an MCP tool server.

pub mod config;
pub mod errors;
pub mod mcp;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod slack;
pub mod store;
pub mod wait;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
