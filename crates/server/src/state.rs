// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use docrun_core::{
    CancellationBus, DocumentRunner, InMemoryBus, InMemoryQueue, JobSubmitter, LifecycleBus,
    QueueConfig, RunDocumentJob, RunRequestBus, WorkQueue, WorkerPool,
};
use docrun_observability::FaultReporter;
use docrun_types::{CancelJob, DocumentRunRequested, LifecycleEvent, RUN_DOCUMENT_API_JOB};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::documents::DocumentResolver;
use crate::streaming::StreamingAdapter;
use crate::version::SdkVersion;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub submitter: JobSubmitter,
    pub streaming: StreamingAdapter,
    pub lifecycle: Arc<LifecycleBus>,
    pub cancellations: Arc<CancellationBus>,
    /// Announcements of runs requested through the public API.
    pub run_requests: Arc<RunRequestBus>,
    pub documents: Arc<dyn DocumentResolver>,
    pub legacy_sdk_threshold: SdkVersion,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        lifecycle: Arc<LifecycleBus>,
        cancellations: Arc<CancellationBus>,
        documents: Arc<dyn DocumentResolver>,
        faults: Arc<dyn FaultReporter>,
        legacy_sdk_threshold: SdkVersion,
    ) -> Arc<Self> {
        let submitter = JobSubmitter::new(queue, Arc::clone(&lifecycle));
        let streaming =
            StreamingAdapter::new(submitter.clone(), Arc::clone(&cancellations), faults);
        Arc::new(Self {
            start_time: Instant::now(),
            submitter,
            streaming,
            lifecycle,
            cancellations,
            run_requests: Arc::new(InMemoryBus::<DocumentRunRequested>::default()),
            documents,
            legacy_sdk_threshold,
        })
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        self.submitter.queue()
    }

    /// Get server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Submitters and workers sharing one process: in-memory buses, an
/// in-memory queue and a worker pool running `runDocumentApiJob`.
pub struct InProcess {
    pub state: Arc<AppState>,
    pub queue: Arc<InMemoryQueue>,
    pub worker: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl InProcess {
    pub fn start(
        config: &QueueConfig,
        runner: Arc<dyn DocumentRunner>,
        documents: Arc<dyn DocumentResolver>,
        faults: Arc<dyn FaultReporter>,
        legacy_sdk_threshold: SdkVersion,
    ) -> Self {
        let lifecycle: Arc<LifecycleBus> =
            Arc::new(InMemoryBus::<LifecycleEvent>::new(config.bus_capacity));
        let cancellations: Arc<CancellationBus> =
            Arc::new(InMemoryBus::<CancelJob>::new(config.bus_capacity));
        let queue = Arc::new(
            InMemoryQueue::new(config.name.clone(), Arc::clone(&lifecycle))
                .with_retention(config.keep_finished),
        );

        let pool = WorkerPool::new(queue.clone(), config).register(
            RUN_DOCUMENT_API_JOB,
            Arc::new(RunDocumentJob::new(runner, Arc::clone(&cancellations))),
        );
        let shutdown = pool.shutdown_token();
        let worker = pool.start();

        let state = AppState::new(
            queue.clone(),
            lifecycle,
            cancellations,
            documents,
            faults,
            legacy_sdk_threshold,
        );
        Self {
            state,
            queue,
            worker,
            shutdown,
        }
    }

    /// Stop taking new jobs and wait for the dequeue loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.queue.close();
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Worker pool task failed");
        }
    }
}
