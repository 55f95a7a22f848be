//! chordwise-server - practice backend service
//!
//! Accepts media-source submissions over HTTP, derives musical metadata on
//! background tasks, and serves job-progress and practice-session streams
//! over WebSocket connections.

use anyhow::Result;
use chordwise_common::config::ServerConfig;
use chordwise_server::analysis::{AnalyzerClient, HttpMediaFetcher, PipelineDeriver};
use chordwise_server::realtime::{DbRevocationCache, SharedSecretVerifier};
use chordwise_server::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting chordwise-server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load()?;
    info!("Database: {}", config.database_path);

    let db_pool = chordwise_server::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let fetcher = Arc::new(
        HttpMediaFetcher::new(Duration::from_secs(config.media_timeout_secs))
            .map_err(|e| anyhow::anyhow!("media fetcher init: {}", e))?,
    );
    let extractor = Arc::new(AnalyzerClient::new(config.analyzer_binary.clone()));
    let deriver = Arc::new(PipelineDeriver::new(fetcher, extractor));

    let verifier = Arc::new(SharedSecretVerifier::new(config.shared_secret));
    let revocation = Arc::new(DbRevocationCache::new(db_pool.clone()));

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(db_pool, config, deriver, verifier, revocation);
    let app = chordwise_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/api/health", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
