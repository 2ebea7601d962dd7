//! The worker-side processor for `runDocumentApiJob`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use docrun_types::{JobReturnValue, ProgressEnvelope, RunError};

use crate::bus::{subscribe_cancellation, CancellationBus};
use crate::runner::{DocumentRunRequest, DocumentRunner, RunningDocument};
use crate::worker::{JobContext, JobProcessor};

/// Runs a document for a dequeued job, relaying each step as progress.
///
/// Listens on the cancellation bus for its own job for as long as the run
/// lasts.
pub struct RunDocumentJob {
    runner: Arc<dyn DocumentRunner>,
    cancellations: Arc<CancellationBus>,
}

impl RunDocumentJob {
    pub fn new(runner: Arc<dyn DocumentRunner>, cancellations: Arc<CancellationBus>) -> Self {
        Self {
            runner,
            cancellations,
        }
    }
}

#[async_trait]
impl JobProcessor for RunDocumentJob {
    async fn process(&self, ctx: JobContext) -> Result<String, RunError> {
        let job_id = ctx.job_id().clone();
        // Dropped on every return below, which detaches the listener.
        let (cancel, _cancel_subscription) =
            subscribe_cancellation(self.cancellations.as_ref(), job_id.clone());

        let request = DocumentRunRequest::from(ctx.data());
        let RunningDocument {
            mut events,
            outcome,
        } = self.runner.run(request, cancel.clone()).await?;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(job_id = %job_id, "Document run aborted");
                    return Err(RunError::Aborted);
                }
                step = events.next() => {
                    let Some(step) = step else { break };
                    let data = serde_json::to_value(ProgressEnvelope::from(step)).map_err(|e| {
                        RunError::from_reason(format!("Failed to encode progress: {e}"))
                    })?;
                    if let Err(e) = ctx.update_progress(data).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to report progress");
                    }
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Aborted),
            outcome = outcome => outcome?,
        };

        let value = JobReturnValue {
            success: true,
            response: outcome.response,
            tool_calls: outcome.tool_calls,
        };
        serde_json::to_string(&value)
            .map_err(|e| RunError::from_reason(format!("Failed to encode job result: {e}")))
    }
}
