//! Durable job store
//!
//! All job mutation flows through this store, which enforces the monotonic
//! status machine at the SQL level: the transition guard lives in the UPDATE
//! WHERE clause, so a racing write can never move a job backwards. Every
//! successful write bumps the per-job `seq` column; progress regressions are
//! clamped with MAX so observed percentages never decrease.

use chordwise_common::events::{DerivedMetadata, JobSnapshot, JobStatus};
use chordwise_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;

/// SQLite-backed job store
#[derive(Clone)]
pub struct JobStore {
    db: SqlitePool,
}

type JobRow = (
    String,         // job_id
    String,         // status
    i64,            // progress_percentage
    String,         // current_step
    String,         // source_reference
    Option<String>, // results (JSON)
    Option<String>, // error_message
    i64,            // seq
    chrono::DateTime<Utc>,
    chrono::DateTime<Utc>,
);

const SELECT_JOB: &str = "SELECT job_id, status, progress_percentage, current_step, \
     source_reference, results, error_message, seq, created_at, updated_at \
     FROM jobs WHERE job_id = ?";

impl JobStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a new pending job and return its initial snapshot
    pub async fn create(&self, job_id: &str, source_reference: &str) -> Result<JobSnapshot> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (job_id, status, progress_percentage, current_step, \
             source_reference, seq, created_at, updated_at) \
             VALUES (?, 'pending', 0, 'Queued', ?, 1, ?, ?)",
        )
        .bind(job_id)
        .bind(source_reference)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.load_required(job_id).await
    }

    /// Load a snapshot; None for unknown job ids
    pub async fn load(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let row: Option<JobRow> = sqlx::query_as(SELECT_JOB)
            .bind(job_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(Self::row_to_snapshot).transpose()
    }

    async fn load_required(&self, job_id: &str) -> Result<JobSnapshot> {
        self.load(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {}", job_id)))
    }

    /// Move a job into (or keep it in) processing with a new step and
    /// progress. Regressing progress is clamped; terminal jobs reject the
    /// write.
    pub async fn mark_processing(
        &self,
        job_id: &str,
        current_step: &str,
        progress_percentage: u8,
    ) -> Result<JobSnapshot> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', \
             progress_percentage = MAX(progress_percentage, ?), \
             current_step = ?, seq = seq + 1, updated_at = ? \
             WHERE job_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(progress_percentage.min(100) as i64)
        .bind(current_step)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id, JobStatus::Processing).await);
        }
        self.load_required(job_id).await
    }

    /// Terminal success: store results, progress 100
    pub async fn complete(&self, job_id: &str, results: &DerivedMetadata) -> Result<JobSnapshot> {
        let payload = serde_json::to_string(results)
            .map_err(|e| Error::Internal(format!("results serialization: {}", e)))?;

        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', progress_percentage = 100, \
             current_step = 'Completed', results = ?, seq = seq + 1, updated_at = ? \
             WHERE job_id = ? AND status = 'processing'",
        )
        .bind(payload)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id, JobStatus::Completed).await);
        }
        self.load_required(job_id).await
    }

    /// Terminal failure: store the error message
    pub async fn fail(&self, job_id: &str, error_message: &str) -> Result<JobSnapshot> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', current_step = 'Failed', \
             error_message = ?, seq = seq + 1, updated_at = ? \
             WHERE job_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id, JobStatus::Failed).await);
        }
        self.load_required(job_id).await
    }

    async fn transition_error(&self, job_id: &str, attempted: JobStatus) -> Error {
        match self.load(job_id).await {
            Ok(Some(snapshot)) => Error::Internal(format!(
                "invalid job transition {} -> {} for {}",
                snapshot.status.as_str(),
                attempted.as_str(),
                job_id
            )),
            Ok(None) => Error::NotFound(format!("job not found: {}", job_id)),
            Err(e) => e,
        }
    }

    fn row_to_snapshot(row: JobRow) -> Result<JobSnapshot> {
        let (
            job_id,
            status,
            progress_percentage,
            current_step,
            source_reference,
            results,
            error_message,
            seq,
            created_at,
            updated_at,
        ) = row;

        let status: JobStatus = status
            .parse()
            .map_err(|e: String| Error::Internal(format!("corrupt job row: {}", e)))?;

        let results = results
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| Error::Internal(format!("corrupt results payload: {}", e)))?;

        Ok(JobSnapshot {
            job_id,
            status,
            progress_percentage: progress_percentage.clamp(0, 100) as u8,
            current_step,
            source_reference,
            results,
            error_message,
            seq,
            created_at,
            updated_at,
        })
    }
}
