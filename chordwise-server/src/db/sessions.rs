//! Practice session directory and append-only event log

use chordwise_common::events::PracticePayload;
use chordwise_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Session ownership lookups and practice telemetry persistence
#[derive(Clone)]
pub struct SessionDirectory {
    db: SqlitePool,
}

impl SessionDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Owner identity of a session; None for unknown session ids
    pub async fn owner_of(&self, session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT owner_identity FROM practice_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(owner,)| owner))
    }

    /// Register a practice session for an identity
    pub async fn create_session(&self, session_id: &str, owner_identity: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO practice_sessions (session_id, owner_identity, created_at) \
             VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(owner_identity)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Append one practice event; failures propagate to the caller
    pub async fn append_practice_event(
        &self,
        sender_identity: &str,
        payload: &PracticePayload,
    ) -> Result<()> {
        let pitch_data = payload
            .pitch_data
            .as_ref()
            .map(|v| v.to_string());
        let timing_data = payload
            .timing_data
            .as_ref()
            .map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO practice_events (session_id, sender_identity, timestamp, \
             current_chord, accuracy, mistake_detected, encouragement, pitch_data, \
             timing_data, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&payload.session_id)
        .bind(sender_identity)
        .bind(payload.timestamp)
        .bind(&payload.current_chord)
        .bind(payload.accuracy)
        .bind(payload.mistake_detected)
        .bind(&payload.encouragement)
        .bind(pitch_data)
        .bind(timing_data)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_database_pool;

    fn payload(session_id: &str) -> PracticePayload {
        PracticePayload {
            session_id: session_id.to_string(),
            timestamp: 4.5,
            current_chord: "Em".to_string(),
            accuracy: 0.88,
            mistake_detected: false,
            encouragement: None,
            pitch_data: Some(serde_json::json!({"f0": 82.4})),
            timing_data: None,
        }
    }

    #[tokio::test]
    async fn test_session_ownership() {
        let dir = SessionDirectory::new(init_database_pool(":memory:").await.unwrap());

        dir.create_session("sess-1", "user-7").await.unwrap();
        assert_eq!(dir.owner_of("sess-1").await.unwrap().as_deref(), Some("user-7"));
        assert_eq!(dir.owner_of("sess-unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_practice_events_append_only() {
        let pool = init_database_pool(":memory:").await.unwrap();
        let dir = SessionDirectory::new(pool.clone());
        dir.create_session("sess-1", "user-7").await.unwrap();

        dir.append_practice_event("user-7", &payload("sess-1")).await.unwrap();
        dir.append_practice_event("user-7", &payload("sess-1")).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM practice_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }
}
