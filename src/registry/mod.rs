//! Session registry, resolver, and staleness detection.

pub mod environment;
pub mod resolver;
pub mod session_registry;
pub mod staleness;

pub use resolver::{list_live_sessions, resolve_session};
pub use session_registry::{HeartbeatOptions, SessionRegistry};
pub use staleness::{spawn_staleness_sweep, sweep_stale_sessions};
