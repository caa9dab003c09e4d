//! Deadline-bounded polling for documents written by another process.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Result of a [`poll_until`] wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The probe produced a value before the deadline.
    Ready(T),
    /// The deadline passed first.
    TimedOut,
}

impl<T> WaitOutcome<T> {
    /// The ready value, if any.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::TimedOut => None,
        }
    }
}

/// Run `probe` every `interval` until it yields `Some` or `timeout` elapses.
///
/// The probe runs once immediately, so a zero timeout is a single check.
/// Timeouts too large to represent wait for roughly thirty years.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> WaitOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = deadline_after(timeout);
    let interval = interval.max(MIN_INTERVAL);

    loop {
        if let Some(value) = probe().await {
            return WaitOutcome::Ready(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let wake = now.checked_add(interval).unwrap_or(deadline).min(deadline);
        time::sleep_until(wake).await;
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
