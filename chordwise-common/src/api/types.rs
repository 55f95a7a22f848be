//! Request/response types for the job submission API

use crate::events::{DerivedMetadata, JobSnapshot, JobStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// POST /api/jobs request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub source_reference: String,
}

/// POST /api/jobs response (acknowledgment, not completion)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// GET /api/jobs/{job_id} response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DerivedMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&JobSnapshot> for JobStatusResponse {
    fn from(snapshot: &JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            status: snapshot.status,
            progress_percentage: snapshot.progress_percentage,
            current_step: snapshot.current_step.clone(),
            estimated_remaining_seconds: snapshot.estimated_remaining_seconds(Utc::now()),
            results: snapshot.results.clone(),
            error_message: snapshot.error_message.clone(),
        }
    }
}
