//! Best-effort detection of the environment a session runs in.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::models::session::EnvironmentInfo;

const GIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Describe the current process.
#[must_use]
pub fn detect_environment() -> EnvironmentInfo {
    EnvironmentInfo {
        pid: std::process::id(),
        os: std::env::consts::OS.to_owned(),
        terminal: non_empty_var("TERM_PROGRAM").or_else(|| non_empty_var("TERM")),
        user: non_empty_var("USER").or_else(|| non_empty_var("USERNAME")),
    }
}

/// Current git branch of `project_path`, or `None` if it is not a work tree,
/// git is unavailable, or HEAD is detached.
pub async fn detect_git_branch(project_path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(project_path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(GIT_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(err)) => {
            debug!(%err, "git unavailable");
            return None;
        }
        Err(_) => {
            debug!("git branch detection timed out");
            return None;
        }
    };

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
