use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::analysis::{Condition, Recommendation, Severity};
use crate::models::job::{Job, JobState, JobStatus};

/// Request to create (or reuse) an analysis job for a scan.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(skip)]
    pub scan_id: Uuid,

    #[garde(range(min = -100, max = 100))]
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
}

/// Result section of a completed job.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultView {
    pub condition: Condition,
    pub confidence: f64,
    pub severity: Severity,
    pub diagnosis: String,
    pub processing_time_ms: i64,
    pub version: String,
}

/// Response for polling a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub scan_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ResultView>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recommendations: Option<Vec<Recommendation>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        let stage = match &job.state {
            JobState::Processing { stage, .. } => stage.clone(),
            _ => None,
        };
        let result = job.result();

        Self {
            job_id: job.id,
            scan_id: job.scan_id,
            status: job.status(),
            progress: job.progress(),
            stage,
            error_message: job.state.error_message().map(str::to_string),
            result: result.map(|r| ResultView {
                condition: r.condition,
                confidence: r.confidence,
                severity: r.severity,
                diagnosis: r.diagnosis.clone(),
                processing_time_ms: r.processing_time_ms,
                version: r.version.clone(),
            }),
            recommendations: result.map(|r| r.recommendations.clone()),
        }
    }
}

/// Response for a cancel request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub success: bool,
}
