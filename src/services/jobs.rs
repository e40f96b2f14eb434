use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::services::dispatcher::DispatcherHandle;
use crate::services::store::{JobStore, StoreError};

/// Caller-facing job operations: create-or-reuse, poll, cancel.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    dispatcher: DispatcherHandle,
}

/// Result of [`JobService::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    /// `false` when an existing active job was returned.
    pub created: bool,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: DispatcherHandle) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Create a job for a scan, or return the scan's active job.
    pub async fn submit(&self, scan_id: Uuid, priority: i32) -> Result<Submission, JobError> {
        if !self.store.scan_exists(scan_id).await? {
            return Err(JobError::ResourceNotFound(scan_id));
        }

        let outcome = self.store.create_job(scan_id, priority).await?;
        if outcome.created {
            metrics::counter!("analysis_jobs_submitted").increment(1);
            tracing::info!(
                job_id = %outcome.job.id,
                scan_id = %scan_id,
                priority,
                "Analysis job created"
            );
            self.dispatcher.enqueue(outcome.job.clone());
        } else {
            tracing::debug!(
                job_id = %outcome.job.id,
                scan_id = %scan_id,
                status = %outcome.job.status(),
                "Reusing active analysis job"
            );
        }

        Ok(Submission {
            job: outcome.job,
            created: outcome.created,
        })
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))
    }

    /// Cancel a job that has not started processing.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, JobError> {
        let job = self.store.cancel_job(job_id).await?;
        self.dispatcher.cancel(job_id);
        metrics::counter!("analysis_jobs_cancelled").increment(1);

        tracing::info!(job_id = %job_id, "Analysis job cancelled");
        Ok(job)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scan {0} not found")]
    ResourceNotFound(Uuid),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Cannot cancel a job that is {0}")]
    InvalidTransition(JobStatus),

    #[error("Persistence failure: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => JobError::JobNotFound(id),
            StoreError::InvalidTransition { from, .. } => JobError::InvalidTransition(from),
            other => JobError::Persistence(other),
        }
    }
}
