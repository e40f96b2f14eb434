//! Test doubles and a harness wiring store, pipeline, and dispatcher in-process

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use iris_analysis::models::analysis::{AnalysisResult, CategoryScore, Condition};
use iris_analysis::models::job::Job;
use iris_analysis::services::dispatcher::{Dispatcher, DispatcherConfig, DispatcherHandle};
use iris_analysis::services::inference::{distribution_for, Classifier, HeuristicClassifier, InferenceError};
use iris_analysis::services::jobs::JobService;
use iris_analysis::services::memory_store::MemoryJobStore;
use iris_analysis::services::pipeline::AnalysisPipeline;
use iris_analysis::services::preprocess::NormalizedImage;
use iris_analysis::services::result_writer::ResultWriter;
use iris_analysis::services::storage::{ImageSource, StorageError};
use iris_analysis::services::store::{CreateOutcome, JobStore, StoreError};

/// Image bytes keyed by scan id. Unknown scans are `NotFound`.
#[derive(Default)]
pub struct MemoryImageSource {
    images: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryImageSource {
    pub fn insert(&self, scan_id: Uuid, bytes: Vec<u8>) {
        self.images.lock().insert(scan_id, bytes);
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    async fn retrieve_image(&self, scan_id: Uuid) -> Result<Vec<u8>, StorageError> {
        self.images
            .lock()
            .get(&scan_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}

/// Holds every classification until a permit is released, tracking how many
/// calls are in flight at once.
pub struct GatedClassifier {
    gate: Semaphore,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    inner: HeuristicClassifier,
}

impl GatedClassifier {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            inner: HeuristicClassifier,
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for GatedClassifier {
    fn model_version(&self) -> &str {
        "gated-test"
    }

    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.classify(image).await
    }
}

/// Always predicts one condition with a fixed confidence.
pub struct FixedClassifier {
    pub condition: Condition,
    pub confidence: f64,
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn model_version(&self) -> &str {
        "fixed-test"
    }

    async fn classify(&self, _image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        Ok(distribution_for(self.condition, Some(self.confidence)))
    }
}

/// Returns scores that do not sum to one.
pub struct BrokenClassifier;

#[async_trait]
impl Classifier for BrokenClassifier {
    fn model_version(&self) -> &str {
        "broken-test"
    }

    async fn classify(&self, _image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        Ok(vec![
            CategoryScore {
                condition: Condition::Cataract,
                score: 0.6,
            },
            CategoryScore {
                condition: Condition::Healthy,
                score: 0.6,
            },
        ])
    }
}

/// Never finishes.
pub struct StalledClassifier;

#[async_trait]
impl Classifier for StalledClassifier {
    fn model_version(&self) -> &str {
        "stalled-test"
    }

    async fn classify(&self, _image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        std::future::pending().await
    }
}

/// Panics inside the Infer stage.
pub struct PanickingClassifier;

#[async_trait]
impl Classifier for PanickingClassifier {
    fn model_version(&self) -> &str {
        "panicking-test"
    }

    async fn classify(&self, _image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        panic!("classifier crashed")
    }
}

/// Delegates to a [`MemoryJobStore`] but rejects every completion commit.
pub struct RejectingCommitStore {
    pub inner: Arc<MemoryJobStore>,
}

#[async_trait]
impl JobStore for RejectingCommitStore {
    async fn create_job(&self, scan_id: Uuid, priority: i32) -> Result<CreateOutcome, StoreError> {
        self.inner.create_job(scan_id, priority).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.inner.cancel_job(job_id).await
    }

    async fn load_pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.load_pending_jobs().await
    }

    async fn start_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.start_job(job_id).await
    }

    async fn update_progress(&self, job_id: Uuid, progress: u8, stage: &str) -> Result<(), StoreError> {
        self.inner.update_progress(job_id, progress, stage).await
    }

    async fn complete_job(
        &self,
        _job_id: Uuid,
        _result: &AnalysisResult,
        _quality_score: f64,
    ) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.fail_job(job_id, error).await
    }

    async fn scan_exists(&self, scan_id: Uuid) -> Result<bool, StoreError> {
        self.inner.scan_exists(scan_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

/// Store, image source, job service, and a dispatcher that tests tick by hand.
pub struct Harness {
    pub memory: Arc<MemoryJobStore>,
    pub store: Arc<dyn JobStore>,
    pub images: Arc<MemoryImageSource>,
    pub jobs: JobService,
    pub dispatcher: Dispatcher,
    pub handle: DispatcherHandle,
}

pub fn config(max_concurrent_jobs: usize) -> DispatcherConfig {
    DispatcherConfig {
        max_concurrent_jobs,
        tick_interval: Duration::from_millis(10),
        job_timeout: Some(Duration::from_secs(10)),
    }
}

impl Harness {
    pub fn new(config: DispatcherConfig, classifier: Arc<dyn Classifier>) -> Self {
        let memory = Arc::new(MemoryJobStore::new());
        Self::with_store(config, classifier, memory.clone(), memory)
    }

    /// Build over an existing store, e.g. to simulate a restart.
    pub fn with_store(
        config: DispatcherConfig,
        classifier: Arc<dyn Classifier>,
        memory: Arc<MemoryJobStore>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let images = Arc::new(MemoryImageSource::default());
        Self::with_parts(config, classifier, memory, store, images)
    }

    pub fn with_parts(
        config: DispatcherConfig,
        classifier: Arc<dyn Classifier>,
        memory: Arc<MemoryJobStore>,
        store: Arc<dyn JobStore>,
        images: Arc<MemoryImageSource>,
    ) -> Self {
        let pipeline = AnalysisPipeline::new(images.clone(), classifier, store.clone());
        let writer = ResultWriter::new(store.clone());
        let (dispatcher, handle) = Dispatcher::new(config, store.clone(), pipeline, writer);
        let jobs = JobService::new(store.clone(), handle.clone());

        Self {
            memory,
            store,
            images,
            jobs,
            dispatcher,
            handle,
        }
    }

    /// Register a scan with a retrievable image.
    pub fn add_scan(&self, image: Vec<u8>) -> Uuid {
        let scan_id = Uuid::new_v4();
        self.memory.register_scan(scan_id);
        self.images.insert(scan_id, image);
        scan_id
    }

    /// Register a scan whose image is missing from storage.
    pub fn add_scan_without_image(&self) -> Uuid {
        let scan_id = Uuid::new_v4();
        self.memory.register_scan(scan_id);
        scan_id
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.store
            .get_job(job_id)
            .await
            .expect("Store read failed")
            .expect("Job not found")
    }

    /// Poll without ticking until the job is terminal.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.job(job_id).await;
            if job.status().is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Job {} stuck in {}",
                job_id,
                job.status()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Tick until every job is terminal.
    pub async fn run_until_settled(&mut self, job_ids: &[Uuid]) -> Vec<Job> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            self.dispatcher.tick().await;

            let mut jobs = Vec::with_capacity(job_ids.len());
            for id in job_ids {
                jobs.push(self.job(*id).await);
            }
            if jobs.iter().all(|j| j.status().is_terminal()) && self.handle.active_count() == 0 {
                return jobs;
            }

            assert!(
                tokio::time::Instant::now() < deadline,
                "Jobs did not settle: {:?}",
                jobs.iter().map(|j| (j.id, j.status())).collect::<Vec<_>>()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Poll until `check` holds or fail after a few seconds.
pub async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "Condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
