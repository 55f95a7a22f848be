//! Subscription registry
//!
//! The only state shared across connections besides the job store: job
//! subscriber sets, session rooms, each connection's own membership set,
//! and the monitor handle per actively-subscribed job. Every mutation goes
//! through one lock, which is what keeps the bidirectional membership
//! invariant (registry entry ⇄ connection subscription set) intact under
//! concurrent subscribe/unsubscribe/close.

use crate::jobs::monitor::MonitorHandle;
use chordwise_common::events::ServerEvent;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// What a membership entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Job,
    Session,
}

/// Connection lifecycle; subscription operations are only valid in Active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// Result of a subscribe_job call
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOutcome {
    /// False when the connection was already subscribed (duplicate is a
    /// no-op, preventing duplicate delivery per broadcast)
    pub newly_subscribed: bool,
    /// True when this subscription created the job's subscriber set, i.e.
    /// the caller should start a monitor
    pub first_subscriber: bool,
}

struct ConnectionEntry {
    identity: String,
    state: ConnectionState,
    tx: mpsc::UnboundedSender<ServerEvent>,
    subscriptions: HashSet<(SubscriptionKind, String)>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    job_subscribers: HashMap<String, HashSet<ConnectionId>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    monitors: HashMap<String, MonitorHandle>,
}

/// Lifecycle-scoped registry object handed to the fabric at startup
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection as active
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        identity: &str,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                identity: identity.to_string(),
                state: ConnectionState::Active,
                tx,
                subscriptions: HashSet::new(),
            },
        );
    }

    /// Add a job subscription, maintaining both sides of the membership
    pub async fn subscribe_job(
        &self,
        connection_id: ConnectionId,
        job_id: &str,
    ) -> SubscribeOutcome {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return SubscribeOutcome::default();
        };
        if entry.state != ConnectionState::Active {
            return SubscribeOutcome::default();
        }

        let newly_subscribed = entry
            .subscriptions
            .insert((SubscriptionKind::Job, job_id.to_string()));

        let subscribers = inner.job_subscribers.entry(job_id.to_string()).or_default();
        let first_subscriber = subscribers.is_empty();
        subscribers.insert(connection_id);

        SubscribeOutcome {
            newly_subscribed,
            first_subscriber: first_subscriber && newly_subscribed,
        }
    }

    /// Remove a job subscription; idempotent. Returns the monitor handle
    /// when the last subscriber just left, for the caller to stop.
    pub async fn unsubscribe_job(
        &self,
        connection_id: ConnectionId,
        job_id: &str,
    ) -> Option<MonitorHandle> {
        let mut inner = self.inner.lock().await;
        Self::detach_job(&mut inner, connection_id, job_id)
    }

    fn detach_job(
        inner: &mut RegistryInner,
        connection_id: ConnectionId,
        job_id: &str,
    ) -> Option<MonitorHandle> {
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry
                .subscriptions
                .remove(&(SubscriptionKind::Job, job_id.to_string()));
        }

        let emptied = match inner.job_subscribers.get_mut(job_id) {
            Some(subscribers) => {
                subscribers.remove(&connection_id);
                subscribers.is_empty()
            }
            None => false,
        };

        if emptied {
            inner.job_subscribers.remove(job_id);
            inner.monitors.remove(job_id)
        } else {
            None
        }
    }

    /// Join a session room; true when newly joined
    pub async fn join_session(&self, connection_id: ConnectionId, session_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return false;
        };
        if entry.state != ConnectionState::Active {
            return false;
        }

        let newly_joined = entry
            .subscriptions
            .insert((SubscriptionKind::Session, session_id.to_string()));
        inner
            .rooms
            .entry(session_id.to_string())
            .or_default()
            .insert(connection_id);
        newly_joined
    }

    /// Leave a session room; idempotent
    pub async fn leave_session(&self, connection_id: ConnectionId, session_id: &str) {
        let mut inner = self.inner.lock().await;
        Self::detach_session(&mut inner, connection_id, session_id);
    }

    fn detach_session(inner: &mut RegistryInner, connection_id: ConnectionId, session_id: &str) {
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry
                .subscriptions
                .remove(&(SubscriptionKind::Session, session_id.to_string()));
        }
        if let Some(members) = inner.rooms.get_mut(session_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.rooms.remove(session_id);
            }
        }
    }

    pub async fn is_session_member(&self, connection_id: ConnectionId, session_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(session_id)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    /// Deliver an event to one connection; dropped if it is gone
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(entry) = inner.connections.get(&connection_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Deliver an event to every subscriber of a job; returns the number of
    /// receivers
    pub async fn broadcast_job(&self, job_id: &str, event: &ServerEvent) -> usize {
        let inner = self.inner.lock().await;
        let Some(subscribers) = inner.job_subscribers.get(job_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in subscribers {
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Deliver an event to every room member except the sender
    pub async fn broadcast_session_except(
        &self,
        session_id: &str,
        sender: ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        let inner = self.inner.lock().await;
        let Some(members) = inner.rooms.get(session_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in members {
            if *connection_id == sender {
                continue;
            }
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Install the monitor handle for a job. Returns the handle back when
    /// the job lost all subscribers between spawn and install (the caller
    /// must stop it) or when a monitor is already present.
    pub async fn install_monitor(
        &self,
        job_id: &str,
        handle: MonitorHandle,
    ) -> Option<MonitorHandle> {
        let mut inner = self.inner.lock().await;
        let has_subscribers = inner
            .job_subscribers
            .get(job_id)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_subscribers || inner.monitors.contains_key(job_id) {
            return Some(handle);
        }
        inner.monitors.insert(job_id.to_string(), handle);
        None
    }

    /// Drop the monitor entry for a job, returning the handle if present.
    /// Monitors call this when they stop themselves on a terminal state.
    pub async fn discard_monitor(&self, job_id: &str) -> Option<MonitorHandle> {
        let mut inner = self.inner.lock().await;
        inner.monitors.remove(job_id)
    }

    /// Remove a closed connection: every membership it holds is detached
    /// (so no registry retains a reference to it) and any monitors left
    /// without subscribers are returned for the caller to stop. Idempotent.
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Vec<MonitorHandle> {
        let mut inner = self.inner.lock().await;
        let Some(mut entry) = inner.connections.remove(&connection_id) else {
            return Vec::new();
        };
        entry.state = ConnectionState::Closed;
        tracing::debug!(
            connection_id = %connection_id,
            identity = %entry.identity,
            "Connection detached from registry"
        );

        let subscriptions: Vec<_> = entry.subscriptions.drain().collect();
        let mut orphaned = Vec::new();
        for (kind, target_id) in subscriptions {
            match kind {
                SubscriptionKind::Job => {
                    if let Some(handle) = Self::detach_job(&mut inner, connection_id, &target_id) {
                        orphaned.push(handle);
                    }
                }
                SubscriptionKind::Session => {
                    Self::detach_session(&mut inner, connection_id, &target_id);
                }
            }
        }
        orphaned
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn monitor_count(&self) -> usize {
        self.inner.lock().await.monitors.len()
    }

    pub async fn job_subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .job_subscribers
            .get(job_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub async fn room_member_count(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .rooms
            .get(session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
