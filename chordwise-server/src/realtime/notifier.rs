//! Per-job broadcast serialization
//!
//! Both broadcast paths (direct state-change writes from the orchestrator
//! and monitor poll ticks) go through this notifier. One lock serializes
//! them, stale snapshots are dropped by sequence number, and a terminal
//! snapshot is broadcast at most once per job even when a monitor tick and
//! the orchestrator's final write race.

use crate::realtime::registry::{ConnectionId, SubscriptionRegistry};
use chordwise_common::events::{JobSnapshot, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct JobStreamState {
    last_seq: i64,
    terminal_sent: bool,
}

/// Serializes job_update fan-out per job
pub struct JobNotifier {
    registry: Arc<SubscriptionRegistry>,
    streams: Mutex<HashMap<String, JobStreamState>>,
}

impl JobNotifier {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Broadcast a snapshot to all subscribers of its job.
    ///
    /// Returns the number of receivers; 0 when the update was suppressed as
    /// stale or as a duplicate terminal broadcast.
    pub async fn broadcast(&self, snapshot: &JobSnapshot) -> usize {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(snapshot.job_id.clone()).or_default();

        if snapshot.seq < state.last_seq {
            // A newer snapshot already went out; never deliver older after
            // newer.
            return 0;
        }
        if state.terminal_sent {
            return 0;
        }

        state.last_seq = snapshot.seq;
        if snapshot.status.is_terminal() {
            state.terminal_sent = true;
        }

        // Delivery happens while the stream entry is held so a racing
        // broadcast for the same job cannot interleave.
        let delivered = self
            .registry
            .broadcast_job(&snapshot.job_id, &ServerEvent::job_update(snapshot))
            .await;

        if delivered > 0 {
            tracing::debug!(
                job_id = %snapshot.job_id,
                seq = snapshot.seq,
                status = snapshot.status.as_str(),
                delivered,
                "Job update broadcast"
            );
        }
        delivered
    }

    /// Send the current snapshot directly to one connection (the immediate
    /// reply to subscribe_job). Bypasses terminal dedupe: a new subscriber
    /// to a finished job must still see the terminal state.
    pub async fn send_snapshot_to(&self, connection_id: ConnectionId, snapshot: &JobSnapshot) {
        self.registry
            .send_to(connection_id, ServerEvent::job_update(snapshot))
            .await;
    }
}
