use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{CancelJobResponse, CreateJobRequest, CreateJobResponse, JobStatusResponse};
use crate::services::jobs::JobError;

/// Handler error rendered as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Validation failed: {0}")]
    Validation(#[from] garde::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Job(JobError::ResourceNotFound(_)) => (StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND"),
            ApiError::Job(JobError::JobNotFound(_)) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            ApiError::Job(JobError::InvalidTransition(_)) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            ApiError::Job(JobError::Persistence(e)) => {
                tracing::error!(error = %e, "Job store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_FAILURE")
            }
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
        };

        let message = match &self {
            ApiError::Job(JobError::Persistence(_)) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

/// POST /api/v1/jobs: Create (or reuse) an analysis job for a scan.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    request.validate()?;

    let submission = state
        .jobs
        .submit(request.scan_id, request.priority.unwrap_or(0))
        .await?;

    let status = if submission.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateJobResponse {
            job_id: submission.job.id,
            status: submission.job.status(),
            progress: submission.job.progress(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Poll job state.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.jobs.get(job_id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// POST /api/v1/jobs/{job_id}/cancel: Cancel a job that is still queued.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    state.jobs.cancel(job_id).await?;
    Ok(Json(CancelJobResponse { success: true }))
}
