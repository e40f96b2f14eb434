//! Four-stage analysis pipeline: preprocess -> infer -> postprocess -> format.
//!
//! Stages run strictly in order for one job. Before each step the next entry
//! of [`CHECKPOINTS`] is persisted, so a polling client sees progress climb in
//! fixed increments.

use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use uuid::Uuid;

use crate::models::analysis::{AnalysisDraft, CategoryScore, Condition, Recommendation, Severity};
use crate::models::job::Job;
use crate::services::catalog;
use crate::services::inference::{validate_scores, Classifier};
use crate::services::preprocess::{self, NormalizedImage};
use crate::services::storage::ImageSource;
use crate::services::store::{JobStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Preprocess,
    Infer,
    Postprocess,
    Format,
}

/// A named progress milestone reached before a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub stage: PipelineStage,
    pub progress: u8,
    pub label: &'static str,
}

/// Milestones in execution order. 100% is written by the completion commit.
pub const CHECKPOINTS: &[Checkpoint] = &[
    Checkpoint {
        stage: PipelineStage::Preprocess,
        progress: 10,
        label: "Loading image",
    },
    Checkpoint {
        stage: PipelineStage::Preprocess,
        progress: 30,
        label: "Analyzing image characteristics",
    },
    Checkpoint {
        stage: PipelineStage::Infer,
        progress: 50,
        label: "Running diagnostic model",
    },
    Checkpoint {
        stage: PipelineStage::Postprocess,
        progress: 70,
        label: "Evaluating findings",
    },
    Checkpoint {
        stage: PipelineStage::Format,
        progress: 90,
        label: "Preparing report",
    },
];

/// Walks [`CHECKPOINTS`] in order, persisting each one.
struct ProgressReporter<'a> {
    store: &'a dyn JobStore,
    job_id: Uuid,
    remaining: std::slice::Iter<'static, Checkpoint>,
}

impl<'a> ProgressReporter<'a> {
    fn new(store: &'a dyn JobStore, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            remaining: CHECKPOINTS.iter(),
        }
    }

    /// Persist the next checkpoint and return it.
    async fn advance(&mut self) -> Result<Option<&'static Checkpoint>, StoreError> {
        let Some(checkpoint) = self.remaining.next() else {
            return Ok(None);
        };

        self.store
            .update_progress(self.job_id, checkpoint.progress, checkpoint.label)
            .await?;

        tracing::debug!(
            job_id = %self.job_id,
            progress = checkpoint.progress,
            stage = %checkpoint.stage,
            label = checkpoint.label,
            "Pipeline checkpoint"
        );
        Ok(Some(checkpoint))
    }
}

/// Postprocess output: the winning condition and its severity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Finding {
    pub condition: Condition,
    pub confidence: f64,
    pub severity: Severity,
}

/// Everything the result writer needs to commit a completed job.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub draft: AnalysisDraft,
    pub quality_score: f64,
}

pub struct AnalysisPipeline {
    images: Arc<dyn ImageSource>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn JobStore>,
}

impl AnalysisPipeline {
    pub fn new(
        images: Arc<dyn ImageSource>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            images,
            classifier,
            store,
        }
    }

    /// Version string recorded on every result.
    pub fn version(&self) -> String {
        format!(
            "iris-pipeline/{}+{}",
            env!("CARGO_PKG_VERSION"),
            self.classifier.model_version()
        )
    }

    /// Run all stages for a job already marked `processing`.
    pub async fn run(&self, job: &Job) -> Result<PipelineOutput, PipelineError> {
        let start = Instant::now();
        let mut progress = ProgressReporter::new(self.store.as_ref(), job.id);

        progress.advance().await?;
        let bytes = self.fetch_image(job.scan_id).await?;

        progress.advance().await?;
        let image = normalize_image(bytes).await?;
        let quality_score = image.quality_score();

        progress.advance().await?;
        let scores = self.infer(&image).await?;

        progress.advance().await?;
        let finding = postprocess(&scores)?;

        tracing::info!(
            job_id = %job.id,
            condition = %finding.condition,
            confidence = finding.confidence,
            severity = %finding.severity,
            quality_score,
            "Analysis finding"
        );

        progress.advance().await?;
        let processing_time_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        let draft = format_report(finding, processing_time_ms, self.version());

        Ok(PipelineOutput {
            draft,
            quality_score,
        })
    }

    async fn fetch_image(&self, scan_id: Uuid) -> Result<Vec<u8>, PipelineError> {
        self.images
            .retrieve_image(scan_id)
            .await
            .map_err(|e| PipelineError::stage(PipelineStage::Preprocess, e))
    }

    async fn infer(&self, image: &NormalizedImage) -> Result<Vec<CategoryScore>, PipelineError> {
        let scores = self
            .classifier
            .classify(image)
            .await
            .map_err(|e| PipelineError::stage(PipelineStage::Infer, e))?;
        validate_scores(&scores).map_err(|e| PipelineError::stage(PipelineStage::Infer, e))?;
        Ok(scores)
    }
}

/// Decode and resize off the async runtime.
async fn normalize_image(bytes: Vec<u8>) -> Result<NormalizedImage, PipelineError> {
    tokio::task::spawn_blocking(move || preprocess::normalize(&bytes))
        .await
        .map_err(|e| PipelineError::stage(PipelineStage::Preprocess, e))?
        .map_err(|e| PipelineError::stage(PipelineStage::Preprocess, e))
}

/// Pick the highest-scoring category and grade it. Ties keep the earlier category.
pub fn postprocess(scores: &[CategoryScore]) -> Result<Finding, PipelineError> {
    let best = scores
        .iter()
        .copied()
        .reduce(|best, next| if next.score > best.score { next } else { best })
        .ok_or_else(|| PipelineError::stage(PipelineStage::Postprocess, "no category scores"))?;

    Ok(Finding {
        condition: best.condition,
        confidence: best.score,
        severity: Severity::classify(best.condition, best.score),
    })
}

/// Attach diagnosis text, ranked recommendations, and pipeline metadata.
pub fn format_report(finding: Finding, processing_time_ms: i64, version: String) -> AnalysisDraft {
    let mut recommendations = catalog::recommendations(finding.condition);
    if let Some(text) = catalog::severity_escalation(finding.severity) {
        recommendations.insert(
            0,
            Recommendation {
                text: text.to_string(),
                priority: 0,
            },
        );
    }

    AnalysisDraft {
        condition: finding.condition,
        confidence: finding.confidence,
        severity: finding.severity,
        diagnosis: catalog::diagnosis_text(finding.condition).to_string(),
        processing_time_ms,
        version,
        recommendations,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage failed. The message is what the job's `error_message` shows.
    #[error("{message}")]
    StageFailure {
        stage: PipelineStage,
        message: String,
    },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl PipelineError {
    pub fn stage(stage: PipelineStage, err: impl std::fmt::Display) -> Self {
        PipelineError::StageFailure {
            stage,
            message: err.to_string(),
        }
    }
}
