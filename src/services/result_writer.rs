use std::sync::Arc;
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::services::pipeline::PipelineOutput;
use crate::services::store::{JobStore, StoreError};

/// Drives a processing job to its terminal state.
pub struct ResultWriter {
    store: Arc<dyn JobStore>,
}

/// Terminal outcome recorded for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Failed { error: String },
}

impl ResultWriter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Commit a successful pipeline run. If the commit itself fails, nothing
    /// from the result is visible and the job is marked failed instead.
    pub async fn commit(&self, job_id: Uuid, output: PipelineOutput) -> Result<Outcome, StoreError> {
        let result = AnalysisResult::from_draft(job_id, output.draft);

        match self
            .store
            .complete_job(job_id, &result, output.quality_score)
            .await
        {
            Ok(()) => {
                metrics::counter!("analysis_jobs_completed").increment(1);
                metrics::histogram!("analysis_processing_seconds")
                    .record(result.processing_time_ms as f64 / 1000.0);

                tracing::info!(
                    job_id = %job_id,
                    condition = %result.condition,
                    severity = %result.severity,
                    recommendations = result.recommendations.len(),
                    "Job completed successfully"
                );
                Ok(Outcome::Completed)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to commit analysis result");
                let message = format!("Failed to save analysis result: {}", e);
                self.fail(job_id, &message).await
            }
        }
    }

    /// Skip all result writes and record the failure message.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<Outcome, StoreError> {
        self.store.fail_job(job_id, error).await?;
        metrics::counter!("analysis_jobs_failed").increment(1);

        tracing::warn!(job_id = %job_id, error = %error, "Job failed");
        Ok(Outcome::Failed {
            error: error.to_string(),
        })
    }
}
