//! Database pool initialization and schema creation

use chordwise_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open (or create) the SQLite database and ensure the core tables exist
///
/// An in-memory database exists per connection, so the pool is pinned to a
/// single connection in that case; every caller then sees the same tables.
pub async fn init_database_pool(database_path: &str) -> Result<SqlitePool> {
    let in_memory = database_path == ":memory:";
    let options = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(chordwise_common::Error::Database)?
    } else {
        SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .min_connections(if in_memory { 1 } else { 0 })
        .connect_with(options)
        .await?;

    create_tables(&pool).await?;
    Ok(pool)
}

/// Create core tables if missing
///
/// Jobs are the durable job store; practice_sessions is the ownership
/// directory consulted by join_session; practice_events is the append-only
/// telemetry log; revoked_tokens backs the revocation cache.
async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress_percentage INTEGER NOT NULL DEFAULT 0,
            current_step TEXT NOT NULL DEFAULT '',
            source_reference TEXT NOT NULL,
            results TEXT,
            error_message TEXT,
            seq INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_sessions (
            session_id TEXT PRIMARY KEY,
            owner_identity TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS practice_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            sender_identity TEXT NOT NULL,
            timestamp REAL NOT NULL,
            current_chord TEXT NOT NULL,
            accuracy REAL NOT NULL,
            mistake_detected INTEGER NOT NULL,
            encouragement TEXT,
            pitch_data TEXT,
            timing_data TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revoked_tokens (
            token_fingerprint TEXT PRIMARY KEY,
            revoked_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_init() {
        let pool = init_database_pool(":memory:").await.unwrap();
        // Tables exist and are queryable
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
