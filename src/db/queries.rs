use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::analysis::{AnalysisResult, Condition, Recommendation, Severity};
use crate::models::job::{Job, JobState, JobStatus, CANCELLED_REASON};
use crate::services::store::{CreateOutcome, JobStore, StoreError};

/// Attempts at insert-or-fetch before giving up on a racing scan.
const CREATE_ATTEMPTS: usize = 3;

const JOB_COLUMNS: &str = "id, resource_id, status, progress, stage, priority, error_message, \
                           created_at, started_at, completed_at";

/// Postgres-backed [`JobStore`].
///
/// Every transition is a conditional single-row `UPDATE`, so concurrent
/// pipelines never clobber each other's rows and a late writer cannot move a
/// job out of a terminal state.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_result(&self, job_id: Uuid) -> Result<Option<AnalysisResult>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, condition, confidence, severity, diagnosis,
                   processing_time_ms, version, created_at
            FROM results
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let result_id: Uuid = row.try_get("id")?;
        let recommendations = sqlx::query(
            r#"
            SELECT text, priority
            FROM recommendations
            WHERE result_id = $1
            ORDER BY priority ASC
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| {
            Ok(Recommendation {
                text: r.try_get("text")?,
                priority: r.try_get("priority")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let condition: String = row.try_get("condition")?;
        let severity: String = row.try_get("severity")?;

        Ok(Some(AnalysisResult {
            id: result_id,
            job_id: row.try_get("job_id")?,
            condition: Condition::from_str(&condition).map_err(|_| StoreError::Corrupt {
                job_id,
                reason: format!("unknown condition '{}'", condition),
            })?,
            confidence: row.try_get("confidence")?,
            severity: Severity::from_str(&severity).map_err(|_| StoreError::Corrupt {
                job_id,
                reason: format!("unknown severity '{}'", severity),
            })?,
            diagnosis: row.try_get("diagnosis")?,
            processing_time_ms: row.try_get("processing_time_ms")?,
            version: row.try_get("version")?,
            recommendations,
            created_at: row.try_get("created_at")?,
        }))
    }

    /// Build a job from a `jobs` row, loading the result for completed jobs.
    async fn hydrate(&self, row: &PgRow) -> Result<Job, StoreError> {
        let job_id: Uuid = row.try_get("id")?;
        let result = if status_of(row)? == JobStatus::Completed {
            self.fetch_result(job_id).await?
        } else {
            None
        };
        job_from_row(row, result)
    }

    async fn current_status(&self, job_id: Uuid) -> Result<JobStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;
        status_of(&row)
    }

    /// Explain why a conditional update matched no row.
    async fn transition_error(&self, job_id: Uuid, to: JobStatus) -> StoreError {
        match self.current_status(job_id).await {
            Ok(from) => StoreError::InvalidTransition { job_id, from, to },
            Err(e) => e,
        }
    }
}

fn status_of(row: &PgRow) -> Result<JobStatus, StoreError> {
    let status: String = row.try_get("status")?;
    JobStatus::from_str(&status).map_err(|_| StoreError::Corrupt {
        job_id: row.try_get("id").unwrap_or_default(),
        reason: format!("unknown status '{}'", status),
    })
}

fn job_from_row(row: &PgRow, result: Option<AnalysisResult>) -> Result<Job, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let progress: i16 = row.try_get("progress")?;
    let progress = progress.clamp(0, 100) as u8;
    let error_message: Option<String> = row.try_get("error_message")?;

    let state = match status_of(row)? {
        JobStatus::Queued => JobState::Queued,
        JobStatus::Processing => JobState::Processing {
            progress,
            stage: row.try_get("stage")?,
        },
        JobStatus::Completed => JobState::Completed {
            result: Box::new(result.ok_or_else(|| StoreError::Corrupt {
                job_id: id,
                reason: "completed job has no result".to_string(),
            })?),
        },
        JobStatus::Failed => JobState::Failed {
            error: error_message.unwrap_or_default(),
            progress,
        },
        JobStatus::Cancelled => JobState::Cancelled {
            reason: error_message.unwrap_or_default(),
        },
    };

    Ok(Job {
        id,
        scan_id: row.try_get("resource_id")?,
        priority: row.try_get("priority")?,
        state,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, scan_id: Uuid, priority: i32) -> Result<CreateOutcome, StoreError> {
        for _ in 0..CREATE_ATTEMPTS {
            // The partial unique index on active jobs turns a duplicate into a no-op.
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO jobs (id, resource_id, status, progress, priority)
                VALUES ($1, $2, 'queued', 0, $3)
                ON CONFLICT (resource_id) WHERE status <> 'failed' DO NOTHING
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(scan_id)
            .bind(priority)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(CreateOutcome {
                    job: job_from_row(&row, None)?,
                    created: true,
                });
            }

            let existing = sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE resource_id = $1 AND status <> 'failed' LIMIT 1"
            ))
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await?;

            // The active job may have failed between the two statements; retry.
            if let Some(row) = existing {
                return Ok(CreateOutcome {
                    job: self.hydrate(&row).await?,
                    created: false,
                });
            }
        }

        Err(StoreError::Contention(scan_id))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(CANCELLED_REASON)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row, None),
            None => Err(self.transition_error(job_id, JobStatus::Cancelled).await),
        }
    }

    async fn load_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| job_from_row(r, None)).collect()
    }

    async fn start_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                progress = 0,
                started_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(job_from_row(&row, None)?)),
            None => {
                // Distinguish a missing job from one that is simply no longer queued.
                self.current_status(job_id).await?;
                Ok(None)
            }
        }
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8, stage: &str) -> Result<(), StoreError> {
        let progress = i16::from(progress.min(100));
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = GREATEST(progress, $2),
                stage = CASE WHEN $2 >= progress THEN $3 ELSE stage END
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(progress)
        .bind(stage)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_error(job_id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result: &AnalysisResult,
        quality_score: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                progress = 100,
                stage = NULL,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(job_id, JobStatus::Completed).await);
        }

        sqlx::query(
            r#"
            INSERT INTO results (id, job_id, condition, confidence, severity, diagnosis,
                                 processing_time_ms, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(result.id)
        .bind(job_id)
        .bind(result.condition.to_string())
        .bind(result.confidence)
        .bind(result.severity.to_string())
        .bind(&result.diagnosis)
        .bind(result.processing_time_ms)
        .bind(&result.version)
        .bind(result.created_at)
        .execute(&mut *tx)
        .await?;

        for rec in &result.recommendations {
            sqlx::query(
                r#"
                INSERT INTO recommendations (id, result_id, text, priority)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(result.id)
            .bind(&rec.text)
            .bind(rec.priority)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE scans
            SET quality_score = $2
            WHERE id = (SELECT resource_id FROM jobs WHERE id = $1)
            "#,
        )
        .bind(job_id)
        .bind(quality_score)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_error(job_id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn scan_exists(&self, scan_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM scans WHERE id = $1) AS found")
            .bind(scan_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
