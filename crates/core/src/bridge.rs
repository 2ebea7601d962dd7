//! Per-job demultiplexer from the lifecycle bus to result slots and callbacks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use docrun_types::{
    ChainStepResponse, JobId, JobReturnValue, LifecycleEvent, ProgressEnvelope, RunError,
    RunEvent, ToolCall,
};

use crate::bus::Subscription;
use crate::deferred::Deferred;
use crate::queue::WorkQueue;
use crate::runner::RunOutcome;

/// Failure reason when the bus dropped events and the job's outcome cannot
/// be recovered.
pub const EVENTS_LOST_MESSAGE: &str = "Lifecycle events lost before the job finished";

pub type ProgressHandler = Box<dyn Fn(RunEvent) + Send + Sync>;
pub type CompletedHandler = Box<dyn Fn(&RunOutcome) + Send + Sync>;
pub type FailedHandler = Box<dyn Fn(&RunError) + Send + Sync>;

/// Optional lifecycle callbacks supplied by the submitter's caller.
#[derive(Default)]
pub struct EventHandlers {
    pub on_progress: Option<ProgressHandler>,
    pub on_completed: Option<CompletedHandler>,
    pub on_failed: Option<FailedHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(RunEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_completed(mut self, f: impl Fn(&RunOutcome) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl Fn(&RunError) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .finish()
    }
}

/// The three terminal slots of a run.
///
/// `tool_calls` and `last_response` are always resolved before `error`, so
/// once `error` resolves the other two can be read without waiting.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub error: Deferred<Option<RunError>>,
    pub last_response: Deferred<Option<ChainStepResponse>>,
    pub tool_calls: Deferred<Vec<ToolCall>>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve as completed. Returns `false` if the run was already settled.
    pub fn resolve_completed(&self, outcome: &RunOutcome) -> bool {
        self.tool_calls.resolve(outcome.tool_calls.clone());
        self.last_response.resolve(outcome.response.clone());
        self.error.resolve(None)
    }

    /// Resolve as failed. Returns `false` if the run was already settled.
    pub fn resolve_failed(&self, error: RunError) -> bool {
        self.tool_calls.resolve(Vec::new());
        self.last_response.resolve(None);
        self.error.resolve(Some(error))
    }

    /// Wait for the run to settle.
    pub async fn wait(&self) -> Result<RunOutcome, RunError> {
        if let Some(error) = self.error.wait().await {
            return Err(error);
        }
        Ok(RunOutcome {
            response: self.last_response.wait().await,
            tool_calls: self.tool_calls.wait().await,
        })
    }
}

/// Listens to the lifecycle bus on behalf of one job.
///
/// When the receiver lags, the job's own terminal event may have been
/// overwritten; the bridge then settles from the queue's job record.
pub struct EventBridge {
    job_id: JobId,
    result: RunResult,
    handlers: EventHandlers,
    queue: Option<Arc<dyn WorkQueue>>,
}

impl EventBridge {
    pub fn new(job_id: JobId, result: RunResult, handlers: EventHandlers) -> Self {
        Self {
            job_id,
            result,
            handlers,
            queue: None,
        }
    }

    /// Queue to consult for the outcome after missed events.
    pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Start listening on `rx`. The listener detaches after the first
    /// terminal event, or when the returned subscription is dropped.
    pub fn attach(self, rx: broadcast::Receiver<LifecycleEvent>) -> Subscription {
        let job_id = self.job_id.clone();
        let handle = tokio::spawn(self.listen(rx));
        Subscription::new(job_id, handle)
    }

    async fn listen(self, mut rx: broadcast::Receiver<LifecycleEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if self.handle(event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        skipped = n,
                        "Event bridge lagged, reconciling with the queue"
                    );
                    if self.reconcile() {
                        break;
                    }
                }
                Err(RecvError::Closed) => {
                    self.fail(RunError::from_reason(
                        "Lifecycle bus closed before the job finished",
                    ));
                    break;
                }
            }
        }
        tracing::debug!(job_id = %self.job_id, "Event bridge detached");
    }

    /// Apply one bus event. Returns `true` when the event was terminal for
    /// this job and the bridge should detach.
    pub fn handle(&self, event: LifecycleEvent) -> bool {
        if event.job_id() != &self.job_id {
            return false;
        }

        match event {
            LifecycleEvent::Queued { .. } => false,
            LifecycleEvent::Progress { data, .. } => {
                if let Some(envelope) = ProgressEnvelope::decode(&data) {
                    if let Some(on_progress) = &self.handlers.on_progress {
                        on_progress(envelope.into_run_event());
                    }
                }
                false
            }
            LifecycleEvent::Completed { returnvalue, .. } => {
                match serde_json::from_str::<JobReturnValue>(&returnvalue) {
                    Ok(value) => self.complete(RunOutcome {
                        response: value.response,
                        tool_calls: value.tool_calls,
                    }),
                    Err(e) => {
                        tracing::error!(job_id = %self.job_id, error = %e, "Malformed job result");
                        self.fail(RunError::MalformedResult(e.to_string()));
                    }
                }
                true
            }
            LifecycleEvent::Failed { failed_reason, .. } => {
                self.fail(RunError::from_reason(failed_reason));
                true
            }
        }
    }

    /// Settle from the queue after missed events. Returns `true` once the
    /// run is settled. A job that is still live keeps the bridge listening;
    /// its terminal event has not been published yet.
    fn reconcile(&self) -> bool {
        let Some(queue) = &self.queue else {
            self.fail(RunError::from_reason(EVENTS_LOST_MESSAGE));
            return true;
        };
        match queue.terminal_event(&self.job_id) {
            Ok(Some(event)) => self.handle(event),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Cannot recover job outcome");
                self.fail(RunError::from_reason(EVENTS_LOST_MESSAGE));
                true
            }
        }
    }

    fn complete(&self, outcome: RunOutcome) {
        if !self.result.resolve_completed(&outcome) {
            tracing::debug!(job_id = %self.job_id, "Ignoring duplicate terminal event");
            return;
        }
        if let Some(on_completed) = &self.handlers.on_completed {
            on_completed(&outcome);
        }
    }

    fn fail(&self, error: RunError) {
        if !self.result.resolve_failed(error.clone()) {
            tracing::debug!(job_id = %self.job_id, "Ignoring duplicate terminal event");
            return;
        }
        if let Some(on_failed) = &self.handlers.on_failed {
            on_failed(&error);
        }
    }
}
