//! Bounded execution queue and external process supervision.

pub mod consumer;
pub mod execution_queue;
pub mod process;
pub mod supervisor;

pub use consumer::spawn_queue_consumer;
pub use execution_queue::{ExecutionQueue, JobOutcome, QueueLimits};
pub use supervisor::{JobSupervisor, SupervisorConfig};
