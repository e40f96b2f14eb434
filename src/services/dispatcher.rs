//! Dispatcher: moves queued jobs into execution under a concurrency cap.
//!
//! The dispatcher exclusively owns the [`QueueManager`]. Other tasks reach it
//! through a [`DispatcherHandle`], whose commands are drained at the start of
//! every tick. Each tick fills free slots and returns without waiting for the
//! pipelines it started.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::Job;
use crate::services::pipeline::AnalysisPipeline;
use crate::services::queue::QueueManager;
use crate::services::result_writer::ResultWriter;
use crate::services::store::{JobStore, StoreError};

/// Error message recorded when the watchdog expires.
pub const TIMEOUT_MESSAGE: &str = "Analysis timed out";

/// Error message recorded when a pipeline stage panics.
pub const PANIC_MESSAGE: &str = "Analysis failed unexpectedly";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of pipelines running at once. Values below 1 are treated as 1.
    pub max_concurrent_jobs: usize,
    pub tick_interval: Duration,
    /// Watchdog for a single pipeline run. `None` disables it.
    pub job_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            tick_interval: Duration::from_secs(3),
            job_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Ids of jobs currently executing.
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActiveSet {
    fn claim(&self, job_id: Uuid) -> ActiveSlot {
        self.inner.lock().insert(job_id);
        ActiveSlot {
            set: self.clone(),
            job_id,
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Releases its slot when the run ends.
struct ActiveSlot {
    set: ActiveSet,
    job_id: Uuid,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let remaining = {
            let mut active = self.set.inner.lock();
            active.remove(&self.job_id);
            active.len()
        };
        metrics::gauge!("analysis_active_jobs").set(remaining as f64);
    }
}

enum Command {
    Enqueue(Job),
    Cancel(Uuid),
}

/// Cloneable handle for submitting work to a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
    active: ActiveSet,
    queue_depth: Arc<AtomicUsize>,
}

impl DispatcherHandle {
    /// Queue a job for dispatch on the next tick.
    pub fn enqueue(&self, job: Job) {
        let job_id = job.id;
        if self.commands.send(Command::Enqueue(job)).is_err() {
            tracing::warn!(job_id = %job_id, "Dispatcher stopped; job remains queued in the store");
        }
    }

    /// Drop a job from future dispatch.
    pub fn cancel(&self, job_id: Uuid) {
        if self.commands.send(Command::Cancel(job_id)).is_err() {
            tracing::warn!(job_id = %job_id, "Dispatcher stopped; cancel not forwarded");
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Queue depth as of the last tick.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

/// Executes one job's pipeline and records its terminal state.
struct JobRunner {
    pipeline: AnalysisPipeline,
    writer: ResultWriter,
    timeout: Option<Duration>,
}

impl JobRunner {
    async fn execute(self: Arc<Self>, job: Job, _slot: ActiveSlot) {
        // The pipeline runs in its own task so a panicking stage still fails the job.
        let runner = self.clone();
        let pipeline_job = job.clone();
        let mut run = tokio::spawn(async move { runner.pipeline.run(&pipeline_job).await });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut run).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    run.abort();
                    None
                }
            },
            None => Some(run.await),
        };

        let outcome = match joined {
            Some(Ok(result)) => result.map_err(|e| e.to_string()),
            Some(Err(e)) => {
                tracing::error!(job_id = %job.id, error = %e, "Analysis task aborted");
                Err(PANIC_MESSAGE.to_string())
            }
            None => Err(TIMEOUT_MESSAGE.to_string()),
        };

        let recorded = match outcome {
            Ok(output) => self.writer.commit(job.id, output).await,
            Err(message) => self.writer.fail(job.id, &message).await,
        };

        if let Err(e) = recorded {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queue: QueueManager,
    commands: mpsc::UnboundedReceiver<Command>,
    active: ActiveSet,
    queue_depth: Arc<AtomicUsize>,
    store: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn JobStore>,
        pipeline: AnalysisPipeline,
        writer: ResultWriter,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = ActiveSet::default();
        let queue_depth = Arc::new(AtomicUsize::new(0));

        let runner = Arc::new(JobRunner {
            pipeline,
            writer,
            timeout: config.job_timeout,
        });

        let handle = DispatcherHandle {
            commands: tx,
            active: active.clone(),
            queue_depth: queue_depth.clone(),
        };

        let dispatcher = Self {
            config,
            queue: QueueManager::new(),
            commands: rx,
            active,
            queue_depth,
            store,
            runner,
        };

        (dispatcher, handle)
    }

    /// Load every persisted `queued` job into the queue. Call once at startup.
    pub async fn rehydrate(&mut self) -> Result<usize, StoreError> {
        let pending = self.store.load_pending_jobs().await?;
        let restored = pending.iter().filter(|job| self.queue.enqueue(job)).count();
        self.publish_depth();

        tracing::info!(restored, "Rehydrated job queue from store");
        Ok(restored)
    }

    fn limit(&self) -> usize {
        self.config.max_concurrent_jobs.max(1)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Enqueue(job) => {
                    if self.queue.enqueue(&job) {
                        tracing::debug!(job_id = %job.id, priority = job.priority, "Job enqueued");
                    }
                }
                Command::Cancel(job_id) => {
                    if self.queue.remove(job_id) {
                        tracing::debug!(job_id = %job_id, "Job removed from queue");
                    }
                }
            }
        }
    }

    fn publish_depth(&self) {
        let depth = self.queue.len();
        self.queue_depth.store(depth, Ordering::Relaxed);
        metrics::gauge!("analysis_queue_depth").set(depth as f64);
    }

    /// One dispatch pass. Returns the number of jobs started.
    pub async fn tick(&mut self) -> usize {
        self.drain_commands();

        let mut started = 0;
        while self.active.len() < self.limit() {
            let Some(entry) = self.queue.dequeue() else {
                break;
            };

            match self.store.start_job(entry.job_id).await {
                Ok(Some(job)) => {
                    tracing::info!(
                        job_id = %job.id,
                        scan_id = %job.scan_id,
                        priority = job.priority,
                        "Dispatching analysis job"
                    );
                    let slot = self.active.claim(job.id);
                    tokio::spawn(self.runner.clone().execute(job, slot));
                    started += 1;
                }
                Ok(None) => {
                    tracing::debug!(job_id = %entry.job_id, "Skipping job that is no longer queued");
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %entry.job_id,
                        error = %e,
                        "Failed to mark job as processing; retrying next tick"
                    );
                    self.queue.requeue(entry);
                    break;
                }
            }
        }

        self.publish_depth();
        metrics::gauge!("analysis_active_jobs").set(self.active.len() as f64);
        started
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Tick on a fixed interval until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_concurrent_jobs = self.limit(),
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        queued = self.queue.len(),
                        active = self.active.len(),
                        "Dispatcher shutting down"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    let started = self.tick().await;
                    if started > 0 {
                        tracing::debug!(started, "Dispatcher tick");
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
