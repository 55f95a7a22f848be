//! chordwise-server library interface
//!
//! Exposes the application state, router assembly, and the fabric internals
//! for integration testing.

pub mod analysis;
pub mod api;
pub mod db;
pub mod error;
pub mod jobs;
pub mod realtime;

pub use crate::error::{ApiError, ApiResult};

use crate::analysis::Deriver;
use crate::db::{JobStore, SessionDirectory};
use crate::jobs::JobOrchestrator;
use crate::realtime::{AuthContext, CredentialVerifier, JobNotifier, RevocationCache, SubscriptionRegistry};
use axum::routing::get;
use axum::Router;
use chordwise_common::config::ServerConfig;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<ServerConfig>,
    /// Job lifecycle owner
    pub orchestrator: Arc<JobOrchestrator>,
    /// Shared subscription registry (jobs, rooms, monitors)
    pub registry: Arc<SubscriptionRegistry>,
    /// Per-job broadcast serialization
    pub notifier: Arc<JobNotifier>,
    /// Session ownership and practice event log
    pub sessions: SessionDirectory,
    /// Handshake authentication
    pub auth: Arc<AuthContext>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: ServerConfig,
        deriver: Arc<dyn Deriver>,
        verifier: Arc<dyn CredentialVerifier>,
        revocation: Arc<dyn RevocationCache>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let notifier = Arc::new(JobNotifier::new(registry.clone()));
        let store = JobStore::new(db.clone());
        let orchestrator = Arc::new(JobOrchestrator::new(store, deriver, notifier.clone()));
        let auth = Arc::new(AuthContext::new(
            verifier,
            revocation,
            Duration::from_millis(config.handshake_timeout_ms),
        ));

        Self {
            sessions: SessionDirectory::new(db.clone()),
            db,
            config: Arc::new(config),
            orchestrator,
            registry,
            notifier,
            auth,
            startup_time: Utc::now(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::job_routes())
        .merge(api::health_routes())
        .route("/ws", get(realtime::connection::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
