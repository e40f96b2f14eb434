use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;

/// Message recorded on every cancelled job.
pub const CANCELLED_REASON: &str = "Analysis cancelled before processing started";

/// Persisted status of an analysis job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, IntoStaticStr, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// `queued -> processing -> {completed | failed}`, `queued -> cancelled`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Lifecycle state of a job. Each variant carries only the fields valid for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing {
        progress: u8,
        stage: Option<String>,
    },
    Completed {
        result: Box<AnalysisResult>,
    },
    Failed {
        error: String,
        progress: u8,
    },
    Cancelled {
        reason: String,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Processing { .. } => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
            JobState::Cancelled { .. } => JobStatus::Cancelled,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobState::Queued | JobState::Cancelled { .. } => 0,
            JobState::Processing { progress, .. } | JobState::Failed { progress, .. } => *progress,
            JobState::Completed { .. } => 100,
        }
    }

    /// Error message for failed or cancelled jobs.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobState::Failed { error, .. } => Some(error),
            JobState::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }
}

/// An analysis job for one scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub priority: i32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(scan_id: Uuid, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            scan_id,
            priority,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn progress(&self) -> u8 {
        self.state.progress()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.state {
            JobState::Completed { result } => Some(result),
            _ => None,
        }
    }

    /// Active jobs block a second submission for the same scan.
    pub fn is_active(&self) -> bool {
        self.status() != JobStatus::Failed
    }
}
