//! Worker pool: pulls jobs off a queue and hands them to processors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docrun_types::{JobId, RunDocumentJobData, RunError};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::{EnqueuedJob, WorkQueue};

/// What a worker runs for one queue job name.
///
/// `Ok` carries the serialized return value published with `completed`;
/// `Err` becomes the `failed` reason once attempts are exhausted.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: JobContext) -> Result<String, RunError>;
}

/// A dequeued job plus the means to report on it.
pub struct JobContext {
    job_id: JobId,
    job: EnqueuedJob,
    queue: Arc<dyn WorkQueue>,
}

impl JobContext {
    pub fn new(job_id: JobId, job: EnqueuedJob, queue: Arc<dyn WorkQueue>) -> Self {
        Self { job_id, job, queue }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn data(&self) -> &RunDocumentJobData {
        &self.job.data
    }

    pub fn attempts_made(&self) -> u32 {
        self.job.attempts_made
    }

    /// Publish a `progress` event for this job.
    pub async fn update_progress(&self, data: Value) -> Result<(), QueueError> {
        self.queue.progress(&self.job_id, data).await
    }
}

/// Runs queue jobs with bounded concurrency.
///
/// Register a processor per job name, then `start`. Jobs with a name nothing
/// is registered for fail right away.
pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    processors: HashMap<String, Arc<dyn JobProcessor>>,
    permits: Arc<Semaphore>,
    attempts: u32,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn WorkQueue>, config: &QueueConfig) -> Self {
        Self {
            queue,
            processors: HashMap::new(),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            attempts: config.attempts.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>, processor: Arc<dyn JobProcessor>) -> Self {
        self.processors.insert(name.into(), processor);
        self
    }

    /// Token that stops dequeuing when cancelled. Jobs already running finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the dequeue loop.
    pub fn start(self) -> JoinHandle<()> {
        let pool = Arc::new(self);
        tokio::spawn(pool.run())
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(
            queue = %self.queue.name(),
            jobs = ?self.processors.keys().collect::<Vec<_>>(),
            "Worker pool started"
        );
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.queue.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let pool = Arc::clone(&self);
            tokio::spawn(async move {
                pool.execute(job).await;
                drop(permit);
            });
        }
        tracing::info!(queue = %self.queue.name(), "Worker pool stopped");
    }

    async fn execute(&self, job: EnqueuedJob) {
        let Some(job_id) = job.id.clone() else {
            tracing::warn!(queue = %self.queue.name(), job_name = %job.name, "Dropping job without id");
            return;
        };

        let Some(processor) = self.processors.get(&job.name).cloned() else {
            let reason = format!("No processor registered for job {}", job.name);
            tracing::error!(job_id = %job_id, "{reason}");
            self.report(self.queue.fail(&job_id, reason).await, &job_id);
            return;
        };

        tracing::debug!(job_id = %job_id, attempt = job.attempts_made, "Processing job");
        let ctx = JobContext::new(job_id.clone(), job.clone(), Arc::clone(&self.queue));
        match processor.process(ctx).await {
            Ok(returnvalue) => {
                self.report(self.queue.complete(&job_id, returnvalue).await, &job_id);
            }
            Err(e) if job.attempts_made < self.attempts && !e.is_abort() => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt = job.attempts_made,
                    error = %e,
                    "Job attempt failed, retrying"
                );
                self.report(self.queue.retry(job).await, &job_id);
            }
            Err(e) => {
                tracing::info!(job_id = %job_id, error = %e, "Job failed");
                self.report(self.queue.fail(&job_id, e.to_string()).await, &job_id);
            }
        }
    }

    fn report(&self, result: Result<(), QueueError>, job_id: &JobId) {
        if let Err(e) = result {
            tracing::error!(queue = %self.queue.name(), job_id = %job_id, error = %e, "Failed to report job outcome");
        }
    }
}
