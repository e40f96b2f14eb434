//! Durable job state.
//!
//! [`JobStore`] is the source of truth for job identity, status, progress, and
//! results. The Postgres implementation lives in [`crate::db::queries`]; an
//! in-memory implementation with the same semantics is in
//! [`crate::services::memory_store`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{Job, JobStatus};

/// Outcome of [`JobStore::create_job`].
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub job: Job,
    /// `false` when an active job for the scan already existed and was returned instead.
    pub created: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `queued` job, or return the existing active (non-failed) job for the scan.
    async fn create_job(&self, scan_id: Uuid, priority: i32) -> Result<CreateOutcome, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// `queued -> cancelled`. Any other current status is an [`StoreError::InvalidTransition`].
    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Every `queued` job, oldest first.
    async fn load_pending_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// `queued -> processing`. Returns `None` if the job is no longer queued.
    async fn start_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Record a progress checkpoint. Never lowers the stored progress.
    async fn update_progress(&self, job_id: Uuid, progress: u8, stage: &str) -> Result<(), StoreError>;

    /// Commit the result, its recommendations, the scan's quality score, and the
    /// `processing -> completed` transition as one unit.
    async fn complete_job(
        &self,
        job_id: Uuid,
        result: &AnalysisResult,
        quality_score: f64,
    ) -> Result<(), StoreError>;

    /// `processing -> failed` with a human-readable message.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Whether the external scan record exists.
    async fn scan_exists(&self, scan_id: Uuid) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Concurrent updates prevented creating a job for scan {0}")]
    Contention(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record for job {job_id}: {reason}")]
    Corrupt { job_id: Uuid, reason: String },
}
