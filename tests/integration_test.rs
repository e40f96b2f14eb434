use iris_analysis::{
    config::AppConfig,
    db::{self, PgJobStore},
    models::analysis::{AnalysisResult, Condition, Severity},
    models::job::{JobStatus, CANCELLED_REASON},
    services::{
        encryption::EncryptionService,
        pipeline::{format_report, Finding},
        storage::{scan_image_key, ImageSource, R2ImageSource, StorageError},
        store::{JobStore, StoreError},
    },
};
use sqlx::PgPool;
use uuid::Uuid;

mod fixtures;

async fn connect() -> PgPool {
    let config = AppConfig::from_env().expect("Failed to load config");

    let pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn insert_scan(pool: &PgPool) -> Uuid {
    let scan_id = Uuid::new_v4();
    sqlx::query("INSERT INTO scans (id, image_key) VALUES ($1, $2)")
        .bind(scan_id)
        .bind(scan_image_key(scan_id))
        .execute(pool)
        .await
        .expect("Failed to insert scan");
    scan_id
}

fn sample_result(job_id: Uuid) -> AnalysisResult {
    let finding = Finding {
        condition: Condition::Glaucoma,
        confidence: 0.93,
        severity: Severity::High,
    };
    AnalysisResult::from_draft(job_id, format_report(finding, 42, "integration".to_string()))
}

/// Job lifecycle against PostgreSQL
///
/// Covers dedup, the allowed transitions, monotonic progress, and the
/// transactional completion commit.
///
/// Note: This requires a running PostgreSQL instance configured via
/// environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_job_lifecycle_postgres() {
    let pool = connect().await;
    let store = PgJobStore::new(pool.clone());

    store.health_check().await.expect("Health check failed");

    let scan_id = insert_scan(&pool).await;
    assert!(store.scan_exists(scan_id).await.unwrap());
    assert!(!store.scan_exists(Uuid::new_v4()).await.unwrap());

    // 1. Create, then dedup
    let created = store.create_job(scan_id, 2).await.expect("Create failed");
    assert!(created.created);
    assert_eq!(created.job.status(), JobStatus::Queued);

    let duplicate = store.create_job(scan_id, 7).await.expect("Create failed");
    assert!(!duplicate.created);
    assert_eq!(duplicate.job.id, created.job.id);
    assert_eq!(duplicate.job.priority, 2);

    let job_id = created.job.id;

    // 2. Pending jobs are visible for rehydration
    let pending = store.load_pending_jobs().await.unwrap();
    assert!(pending.iter().any(|j| j.id == job_id));

    // 3. queued -> processing, exactly once
    let started = store.start_job(job_id).await.unwrap().expect("Job not started");
    assert_eq!(started.status(), JobStatus::Processing);
    assert!(started.started_at.is_some());
    assert!(store.start_job(job_id).await.unwrap().is_none());

    // 4. Progress never goes backwards
    store.update_progress(job_id, 30, "Analyzing image characteristics").await.unwrap();
    store.update_progress(job_id, 10, "Loading image").await.unwrap();
    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.progress(), 30);

    // 5. Processing jobs cannot be cancelled
    let err = store.cancel_job(job_id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Processing,
            ..
        }
    ));

    // 6. Completion writes job, result, recommendations, and scan together
    let result = sample_result(job_id);
    store.complete_job(job_id, &result, 0.64).await.expect("Complete failed");

    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.progress(), 100);
    assert!(job.completed_at.is_some());

    let stored = job.result().expect("Result missing");
    assert_eq!(stored.condition, Condition::Glaucoma);
    assert_eq!(stored.severity, Severity::High);
    assert_eq!(stored.recommendations.len(), result.recommendations.len());
    assert_eq!(stored.recommendations[0].priority, 0);
    assert!(stored
        .recommendations
        .windows(2)
        .all(|w| w[0].priority <= w[1].priority));

    let quality: Option<f64> = sqlx::query_scalar("SELECT quality_score FROM scans WHERE id = $1")
        .bind(scan_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(quality, Some(0.64));

    // 7. Terminal states are final
    assert!(store.fail_job(job_id, "late failure").await.is_err());
    assert!(store.update_progress(job_id, 90, "Preparing report").await.is_err());

    // 8. Completed jobs still block new jobs for the scan
    let again = store.create_job(scan_id, 0).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.job.id, job_id);
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_failed_and_cancelled_jobs_postgres() {
    let pool = connect().await;
    let store = PgJobStore::new(pool.clone());

    // A failed job frees the scan for a retry
    let scan_id = insert_scan(&pool).await;
    let first = store.create_job(scan_id, 0).await.unwrap().job;
    store.start_job(first.id).await.unwrap().expect("Job not started");
    store.update_progress(first.id, 10, "Loading image").await.unwrap();
    store.fail_job(first.id, "Image not found").await.unwrap();

    let failed = store.get_job(first.id).await.unwrap().unwrap();
    assert_eq!(failed.status(), JobStatus::Failed);
    assert_eq!(failed.state.error_message(), Some("Image not found"));
    assert_eq!(failed.progress(), 10);
    assert!(failed.result().is_none());

    let retry = store.create_job(scan_id, 0).await.unwrap();
    assert!(retry.created);
    assert_ne!(retry.job.id, first.id);

    // Cancelling a queued job is final and it is never started
    let cancelled = store.cancel_job(retry.job.id).await.unwrap();
    assert_eq!(cancelled.status(), JobStatus::Cancelled);
    assert_eq!(cancelled.state.error_message(), Some(CANCELLED_REASON));
    assert!(store.start_job(retry.job.id).await.unwrap().is_none());

    let pending = store.load_pending_jobs().await.unwrap();
    assert!(pending.iter().all(|j| j.id != retry.job.id));

    let missing = Uuid::new_v4();
    assert!(matches!(
        store.cancel_job(missing).await,
        Err(StoreError::JobNotFound(id)) if id == missing
    ));
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_concurrent_create_postgres() {
    let pool = connect().await;
    let store = PgJobStore::new(pool.clone());
    let scan_id = insert_scan(&pool).await;

    let outcomes = futures::future::join_all((0..10).map(|_| store.create_job(scan_id, 0))).await;

    let outcomes: Vec<_> = outcomes
        .into_iter()
        .map(|o| o.expect("Create failed"))
        .collect();
    assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
    assert!(outcomes.iter().all(|o| o.job.id == outcomes[0].job.id));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE resource_id = $1")
        .bind(scan_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

/// Encrypted image round trip through R2
///
/// Note: This requires R2 credentials configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_image_storage_r2() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let encryption =
        EncryptionService::new(&config.encryption_key).expect("Failed to initialize encryption");
    let images = R2ImageSource::connect(&config.r2(), encryption).expect("Failed to initialize R2");

    let scan_id = Uuid::new_v4();
    let png = fixtures::fixture("clear_eye").png_bytes();

    images.store_image(scan_id, &png).await.expect("Upload failed");
    let downloaded = images.retrieve_image(scan_id).await.expect("Download failed");
    assert_eq!(downloaded, png);

    images.remove_image(scan_id).await.expect("Delete failed");
    assert!(matches!(
        images.retrieve_image(scan_id).await,
        Err(StorageError::NotFound)
    ));
}

/// Sealed scan images open byte-for-byte and still decode
#[test]
fn test_scan_image_seal_roundtrip() {
    let key = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [7u8; 32]);
    let encryption = EncryptionService::new(&key).expect("Failed to create encryption service");
    let scan_id = Uuid::new_v4();

    let plaintext = fixtures::fixture("inflamed_eye").png_bytes();
    let sealed = encryption.seal(scan_id, &plaintext).expect("Sealing failed");
    let opened = encryption.open(scan_id, &sealed).expect("Opening failed");

    assert_eq!(plaintext, opened);
    assert_ne!(sealed, plaintext);
    assert!(iris_analysis::services::preprocess::normalize(&opened).is_ok());
}
