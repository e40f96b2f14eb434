use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{Job, JobState, JobStatus, CANCELLED_REASON};
use crate::services::store::{CreateOutcome, JobStore, StoreError};

/// In-process [`JobStore`]. A single lock serializes every write, so each row
/// transition and each completion commit is atomic.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    /// Job ids in insertion order.
    order: Vec<Uuid>,
    /// Known scans and their derived image-quality score.
    scans: HashMap<Uuid, Option<f64>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a scan known to the store so jobs can be created for it.
    pub fn register_scan(&self, scan_id: Uuid) {
        self.state.lock().scans.entry(scan_id).or_insert(None);
    }

    /// Quality score written by a successful analysis, if any.
    pub fn scan_quality(&self, scan_id: Uuid) -> Option<f64> {
        self.state.lock().scans.get(&scan_id).copied().flatten()
    }

    /// Number of job rows (in any status) referencing the scan.
    pub fn jobs_for_scan(&self, scan_id: Uuid) -> usize {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|j| j.scan_id == scan_id)
            .count()
    }
}

impl MemoryState {
    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut Job, StoreError> {
        self.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))
    }
}

fn check_transition(job: &Job, to: JobStatus) -> Result<(), StoreError> {
    let from = job.status();
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            job_id: job.id,
            from,
            to,
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, scan_id: Uuid, priority: i32) -> Result<CreateOutcome, StoreError> {
        let mut state = self.state.lock();

        if let Some(existing) = state
            .jobs
            .values()
            .find(|j| j.scan_id == scan_id && j.is_active())
        {
            return Ok(CreateOutcome {
                job: existing.clone(),
                created: false,
            });
        }

        let job = Job::new(scan_id, priority);
        state.order.push(job.id);
        state.jobs.insert(job.id, job.clone());

        Ok(CreateOutcome { job, created: true })
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().jobs.get(&job_id).cloned())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let mut state = self.state.lock();
        let job = state.job_mut(job_id)?;
        check_transition(job, JobStatus::Cancelled)?;

        job.state = JobState::Cancelled {
            reason: CANCELLED_REASON.to_string(),
        };
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn load_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock();
        let mut pending: Vec<Job> = state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| j.status() == JobStatus::Queued)
            .cloned()
            .collect();
        // Insertion order already matches creation order; the stable sort only
        // matters for jobs that share a timestamp.
        pending.sort_by_key(|j| j.created_at);
        Ok(pending)
    }

    async fn start_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.lock();
        let job = state.job_mut(job_id)?;
        if job.status() != JobStatus::Queued {
            return Ok(None);
        }

        job.state = JobState::Processing {
            progress: 0,
            stage: None,
        };
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8, stage: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let job = state.job_mut(job_id)?;

        match &mut job.state {
            JobState::Processing {
                progress: current,
                stage: current_stage,
            } => {
                if progress >= *current {
                    *current = progress.min(100);
                    *current_stage = Some(stage.to_string());
                }
                Ok(())
            }
            other => Err(StoreError::InvalidTransition {
                job_id,
                from: other.status(),
                to: JobStatus::Processing,
            }),
        }
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result: &AnalysisResult,
        quality_score: f64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let job = state.job_mut(job_id)?;
        check_transition(job, JobStatus::Completed)?;

        job.state = JobState::Completed {
            result: Box::new(result.clone()),
        };
        job.completed_at = Some(Utc::now());
        let scan_id = job.scan_id;

        // The scan is external; an unknown scan is left untouched.
        if let Some(quality) = state.scans.get_mut(&scan_id) {
            *quality = Some(quality_score);
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let job = state.job_mut(job_id)?;
        check_transition(job, JobStatus::Failed)?;

        job.state = JobState::Failed {
            error: error.to_string(),
            progress: job.progress(),
        };
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn scan_exists(&self, scan_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.lock().scans.contains_key(&scan_id))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
