//! Job submission API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chordwise_common::api::types::{JobStatusResponse, SubmitJobRequest, SubmitJobResponse};

use crate::{error::ApiResult, AppState};

/// POST /api/jobs
///
/// Accept a submission. Returns 202 with the job id; derivation continues
/// in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let snapshot = state.orchestrator.submit(&request.source_reference).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: snapshot.job_id,
            status: snapshot.status,
        }),
    ))
}

/// GET /api/jobs/{job_id}
///
/// Read-only snapshot; unknown ids return a structured NotFound.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let snapshot = state.orchestrator.status(&job_id).await?;
    Ok(Json(JobStatusResponse::from(&snapshot)))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/:job_id", get(get_job_status))
}
