//! Staleness sweep: terminate sessions whose owner stopped heartbeating.
//!
//! Runs in the long-lived bot process. Age is measured from the heartbeat
//! file's mtime, or from `created_at` when no heartbeat exists yet.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::notifier::{DeliveryTarget, Notifier, OutboundMessage};
use crate::registry::resolver::{clear_pointer_if, list_sessions};
use crate::store::{record, SessionDocuments, StorageLayout};

/// Terminate every live session older than `stale_after` at `now`.
///
/// Returns the ids of sessions terminated by this sweep. A failure on one
/// session is logged and does not stop the sweep.
pub async fn sweep_stale_sessions(
    layout: &StorageLayout,
    stale_after: Duration,
    now: SystemTime,
    notifier: &dyn Notifier,
) -> Vec<String> {
    let mut terminated = Vec::new();

    for session in list_sessions(layout) {
        if !session.is_live() {
            continue;
        }
        let session_id = session.session_id.clone();

        let reference = layout
            .heartbeat_path(&session_id)
            .ok()
            .and_then(|path| record::modified_at(&path))
            .unwrap_or_else(|| SystemTime::from(session.created_at));
        let age = now.duration_since(reference).unwrap_or(Duration::ZERO);
        if age <= stale_after {
            continue;
        }

        let documents = match SessionDocuments::new(layout.clone(), &session_id) {
            Ok(docs) => docs,
            Err(err) => {
                warn!(session_id, %err, "skipping session with unsafe id");
                continue;
            }
        };

        let reason = format!("no heartbeat for {}s", age.as_secs());
        let stamp = DateTime::<Utc>::from(now);
        let mut changed = false;
        let updated = documents.update_meta(|meta| {
            changed = meta.terminate(&reason, stamp);
            changed
        });
        let record = match updated {
            Ok(Some(rec)) if changed => rec,
            Ok(_) => continue,
            Err(err) => {
                warn!(session_id, %err, "failed to terminate stale session");
                continue;
            }
        };

        clear_pointer_if(layout, &session_id);
        info!(session_id, age_secs = age.as_secs(), "stale session terminated");

        if let Some(thread) = record.thread.as_ref() {
            let notice = OutboundMessage::plain(format!(
                "Session `{}` ({}) was marked terminated: {reason}.",
                record.project_name, session_id
            ));
            if let Err(err) = notifier
                .deliver(DeliveryTarget::Thread(thread.clone()), notice)
                .await
            {
                warn!(session_id, %err, "failed to post staleness notice");
            }
        }
        terminated.push(session_id);
    }

    terminated
}

/// Spawn the periodic staleness sweep.
#[must_use]
pub fn spawn_staleness_sweep(
    layout: StorageLayout,
    stale_after: Duration,
    interval: Duration,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("staleness sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let span = info_span!("staleness_sweep");
            let swept =
                sweep_stale_sessions(&layout, stale_after, SystemTime::now(), notifier.as_ref())
                    .instrument(span)
                    .await;
            if !swept.is_empty() {
                info!(count = swept.len(), "staleness sweep terminated sessions");
            }
        }
    })
}
