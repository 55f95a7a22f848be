//! Per-job monitor tasks
//!
//! One monitor exists per actively-subscribed job. It polls the job store
//! on a fixed interval and broadcasts the snapshot to the job's
//! subscribers; a terminal snapshot triggers one final broadcast and the
//! monitor stops itself, releasing the timer whether or not subscribers
//! remain.

use crate::db::JobStore;
use crate::realtime::notifier::JobNotifier;
use crate::realtime::registry::SubscriptionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancellable handle to a running job monitor
///
/// Stopping the monitor only stops polling and broadcasting; the underlying
/// derivation task is never cancelled through this handle.
#[derive(Debug)]
pub struct MonitorHandle {
    job_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cancel the monitor task; repeated stops are harmless
    pub fn stop(self) {
        self.cancel.cancel();
        // The task observes the token and exits on its own; abort is not
        // needed and would race the final broadcast.
        drop(self.task);
    }
}

/// Spawn the periodic monitor for a job
pub fn spawn_monitor(
    job_id: String,
    store: JobStore,
    notifier: Arc<JobNotifier>,
    registry: Arc<SubscriptionRegistry>,
    poll_interval: Duration,
) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task_job_id = job_id.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::debug!(job_id = %task_job_id, "Job monitor started");

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!(job_id = %task_job_id, "Job monitor cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match store.load(&task_job_id).await {
                Ok(Some(snapshot)) => {
                    let terminal = snapshot.status.is_terminal();
                    notifier.broadcast(&snapshot).await;
                    if terminal {
                        // Final broadcast done; release the timer even if
                        // subscribers remain.
                        registry.discard_monitor(&task_job_id).await;
                        tracing::debug!(job_id = %task_job_id, "Job monitor stopped on terminal state");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::warn!(job_id = %task_job_id, "Monitored job vanished from store");
                    registry.discard_monitor(&task_job_id).await;
                    break;
                }
                Err(e) => {
                    // Transient store read failure; keep polling
                    tracing::warn!(job_id = %task_job_id, error = %e, "Monitor poll failed");
                }
            }
        }
    });

    MonitorHandle {
        job_id,
        cancel,
        task,
    }
}
