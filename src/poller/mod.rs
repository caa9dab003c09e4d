//! Outbound delivery: change detection over session documents.

pub mod change_poller;
pub mod threads;
pub mod trigger;

pub use change_poller::{spawn_change_poller, ChangePoller, PollerOptions, TickReport};
pub use threads::ThreadDirectory;
pub use trigger::{watch_sessions, PollTrigger};
