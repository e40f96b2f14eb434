use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Eye conditions the diagnostic model can report.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, IntoStaticStr,
    PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Condition {
    Cataract,
    Healthy,
    Pterygium,
    Glaucoma,
    Keratoconus,
    Strabismus,
    PinkEye,
    Stye,
    Trachoma,
    Uveitis,
}

impl Condition {
    /// The baseline category. Always maps to [`Severity::None`].
    pub const BASELINE: Condition = Condition::Healthy;

    pub fn is_baseline(self) -> bool {
        self == Self::BASELINE
    }
}

/// Severity tier derived from the winning category's score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Moderate,
    High,
}

/// Scores above this are `high`.
pub const HIGH_SEVERITY_THRESHOLD: f64 = 0.9;

/// Scores above this (and not above the high threshold) are `moderate`.
pub const MODERATE_SEVERITY_THRESHOLD: f64 = 0.7;

impl Severity {
    pub fn classify(condition: Condition, score: f64) -> Self {
        if condition.is_baseline() {
            Severity::None
        } else if score > HIGH_SEVERITY_THRESHOLD {
            Severity::High
        } else if score > MODERATE_SEVERITY_THRESHOLD {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

/// One (label, score) pair produced by the Infer stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub condition: Condition,
    pub score: f64,
}

/// A ranked follow-up action attached to a result. Lower priority ranks first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub text: String,
    pub priority: i32,
}

/// Pipeline output before it is committed. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisDraft {
    pub condition: Condition,
    pub confidence: f64,
    pub severity: Severity,
    pub diagnosis: String,
    pub processing_time_ms: i64,
    pub version: String,
    pub recommendations: Vec<Recommendation>,
}

/// A committed analysis result, owned by exactly one completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub condition: Condition,
    pub confidence: f64,
    pub severity: Severity,
    pub diagnosis: String,
    pub processing_time_ms: i64,
    pub version: String,
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn from_draft(job_id: Uuid, mut draft: AnalysisDraft) -> Self {
        draft.recommendations.sort_by_key(|r| r.priority);
        Self {
            id: Uuid::new_v4(),
            job_id,
            condition: draft.condition,
            confidence: draft.confidence,
            severity: draft.severity,
            diagnosis: draft.diagnosis,
            processing_time_ms: draft.processing_time_ms,
            version: draft.version,
            recommendations: draft.recommendations,
            created_at: Utc::now(),
        }
    }
}
