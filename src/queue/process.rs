//! Process-tree control for supervised jobs.
//!
//! On unix every job is spawned as the leader of its own process group, so
//! signalling the group reaches the host CLI and everything it started.

use tracing::debug;

use crate::{AppError, Result};

/// Whether a process with `pid` currently exists.
#[cfg(unix)]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with `pid` currently exists.
#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Force-terminate the process group led by `pid`.
///
/// A group that has already exited is treated as success.
///
/// # Errors
///
/// Returns `AppError::Process` if the signal cannot be delivered.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already gone");
            Ok(())
        }
        Err(err) => Err(AppError::Process(format!(
            "failed to kill process group {pid}: {err}"
        ))),
    }
}

/// Force-terminate the process tree rooted at `pid`.
///
/// # Errors
///
/// Always returns `AppError::Process`; without process groups the caller
/// must kill through its child handle instead.
#[cfg(not(unix))]
pub fn kill_tree(pid: u32) -> Result<()> {
    debug!(pid, "process-group kill unavailable on this platform");
    Err(AppError::Process(format!(
        "cannot signal process tree {pid} on this platform"
    )))
}
