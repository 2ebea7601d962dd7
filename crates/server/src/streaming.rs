//! Turns a queued document run into an ordered stream of frames.
//!
//! Frames are numbered from 0 in delivery order. A failed run ends with one
//! `error` frame; a completed run ends after its last progress frame. If the
//! consumer goes away first, a single `CancelJob` is published for the job.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use docrun_core::{CancellationBus, DocumentRun, EventBus, EventHandlers, JobSubmitter};
use docrun_observability::{Fault, FaultReporter};
use docrun_types::{CancelJob, DocumentRunParams, JobId, RunEvent, StreamFrame};

use crate::metrics::{self, RunMode, RunOutcomeLabel, RunTimer};

/// Frames buffered for a slow consumer before the producer waits.
const OUTWARD_BUFFER: usize = 64;

/// What the bridge callbacks hand to the producer task.
enum Signal {
    Progress(RunEvent),
    Failed(String),
}

#[derive(Clone)]
pub struct StreamingAdapter {
    submitter: JobSubmitter,
    cancellations: Arc<CancellationBus>,
    faults: Arc<dyn FaultReporter>,
}

impl StreamingAdapter {
    pub fn new(
        submitter: JobSubmitter,
        cancellations: Arc<CancellationBus>,
        faults: Arc<dyn FaultReporter>,
    ) -> Self {
        Self {
            submitter,
            cancellations,
            faults,
        }
    }

    /// Submit `params` and stream the run's frames.
    ///
    /// Submission happens in the background: a rejected submission is
    /// reported as a fault and the stream simply ends.
    pub fn stream(&self, params: DocumentRunParams) -> ReceiverStream<StreamFrame> {
        let (out_tx, out_rx) = mpsc::channel(OUTWARD_BUFFER);
        tokio::spawn(self.clone().produce(params, out_tx));
        ReceiverStream::new(out_rx)
    }

    async fn produce(self, params: DocumentRunParams, out: mpsc::Sender<StreamFrame>) {
        let timer = RunTimer::new(RunMode::Streaming);
        let (signal_tx, mut signals) = mpsc::unbounded_channel();
        let handlers = {
            let progress_tx = signal_tx.clone();
            let failed_tx = signal_tx;
            EventHandlers::new()
                .on_progress(move |event| {
                    let _ = progress_tx.send(Signal::Progress(event));
                })
                .on_failed(move |error| {
                    let _ = failed_tx.send(Signal::Failed(error.to_string()));
                })
        };

        let run = match self.submitter.enqueue_document_run(params, Some(handlers)).await {
            Ok(run) => run,
            Err(e) => {
                self.faults.report(Fault::new("streaming", e.to_string()));
                return;
            }
        };
        metrics::record_submitted(RunMode::Streaming);

        let mut writer = FrameWriter {
            out,
            next_id: 0,
            job_id: run.job_id().clone(),
        };
        let outcome = self.pump(&run, &mut writer, &mut signals).await;
        // A consumer that leaves after the job settled needs no cancellation.
        if outcome == RunOutcomeLabel::Disconnected && !run.result.error.is_resolved() {
            self.cancel(&writer.job_id);
        }
        timer.finish(outcome);
    }

    async fn pump(
        &self,
        run: &DocumentRun,
        writer: &mut FrameWriter,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
    ) -> RunOutcomeLabel {
        let mut settled = false;
        loop {
            tokio::select! {
                biased;
                _ = writer.out.closed() => return RunOutcomeLabel::Disconnected,
                signal = signals.recv() => match signal {
                    Some(Signal::Progress(event)) => {
                        if !writer.progress(event).await {
                            return RunOutcomeLabel::Disconnected;
                        }
                    }
                    Some(Signal::Failed(reason)) => {
                        writer.error(&reason).await;
                        return failure_label(&reason);
                    }
                    None => return RunOutcomeLabel::Completed,
                },
                error = run.result.error.wait(), if !settled => {
                    settled = true;
                    if error.is_none() {
                        // Progress callbacks run before the slot resolves, so
                        // everything left is already buffered.
                        while let Ok(signal) = signals.try_recv() {
                            if let Signal::Progress(event) = signal {
                                if !writer.progress(event).await {
                                    return RunOutcomeLabel::Disconnected;
                                }
                            }
                        }
                        return RunOutcomeLabel::Completed;
                    }
                    // Failed: the error frame arrives through the failure
                    // callback right after the slot resolves.
                }
            }
        }
    }

    fn cancel(&self, job_id: &JobId) {
        tracing::info!(job_id = %job_id, "Stream consumer disconnected, cancelling job");
        self.cancellations.publish(CancelJob {
            job_id: job_id.clone(),
        });
        metrics::record_cancellation("disconnect");
    }
}

fn failure_label(reason: &str) -> RunOutcomeLabel {
    if docrun_types::RunError::from_reason(reason).is_abort() {
        RunOutcomeLabel::Aborted
    } else {
        RunOutcomeLabel::Failed
    }
}

struct FrameWriter {
    out: mpsc::Sender<StreamFrame>,
    next_id: u64,
    job_id: JobId,
}

impl FrameWriter {
    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Returns `false` if the consumer is gone.
    async fn progress(&mut self, event: RunEvent) -> bool {
        let id = self.take_id();
        let frame = StreamFrame::new(id, event.event, &event.data);
        self.out.send(frame).await.is_ok()
    }

    async fn error(&mut self, reason: &str) {
        let id = self.take_id();
        if self.out.send(StreamFrame::error(id, reason)).await.is_err() {
            tracing::debug!(job_id = %self.job_id, "Consumer left before the error frame");
        }
    }
}

/// Map a frame onto a server-sent event.
pub fn sse_event(frame: StreamFrame) -> Result<Event, Infallible> {
    Ok(Event::default()
        .id(frame.id)
        .event(frame.event)
        .data(frame.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrun_core::{InMemoryBus, InMemoryQueue, WorkQueue};
    use docrun_types::LifecycleEvent;

    #[test]
    fn test_failure_label() {
        assert_eq!(failure_label("Job aborted by client"), RunOutcomeLabel::Aborted);
        assert_eq!(failure_label("boom"), RunOutcomeLabel::Failed);
    }

    #[tokio::test]
    async fn test_frames_are_numbered_from_zero() {
        let lifecycle = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let queue = Arc::new(InMemoryQueue::new("documents", lifecycle.clone()));
        let adapter = StreamingAdapter::new(
            JobSubmitter::new(queue.clone(), lifecycle.clone()),
            Arc::new(InMemoryBus::<CancelJob>::default()),
            Arc::new(docrun_observability::TracingReporter),
        );

        let mut frames = adapter.stream(DocumentRunParams::default());
        let first = futures_util::StreamExt::next(&mut frames).await.unwrap();
        assert_eq!(first.id, "0");
        assert_eq!(first.event, "job_queued");

        let job = queue.next().await.unwrap();
        queue
            .fail(job.id.as_ref().unwrap(), "boom".into())
            .await
            .unwrap();
        let second = futures_util::StreamExt::next(&mut frames).await.unwrap();
        assert_eq!(second.id, "1");
        assert_eq!(second.event, "error");
        assert_eq!(second.data, r#"{"error":"boom"}"#);
        assert!(futures_util::StreamExt::next(&mut frames).await.is_none());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(lifecycle.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_consumer_leaving_after_failure_does_not_cancel() {
        let lifecycle = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let cancellations = Arc::new(InMemoryBus::<CancelJob>::default());
        let queue = Arc::new(InMemoryQueue::new("documents", lifecycle.clone()));
        let adapter = StreamingAdapter::new(
            JobSubmitter::new(queue.clone(), lifecycle.clone()),
            cancellations.clone(),
            Arc::new(docrun_observability::TracingReporter),
        );
        let mut published = cancellations.subscribe();

        let mut frames = adapter.stream(DocumentRunParams::default());
        futures_util::StreamExt::next(&mut frames).await.unwrap();
        let job = queue.next().await.unwrap();
        let job_id = job.id.unwrap();

        // More progress than the outward buffer holds, so the producer is
        // still writing when the job fails.
        for n in 0..(OUTWARD_BUFFER + 8) {
            let step = serde_json::json!({
                "type": "stream_event",
                "event": "provider-event",
                "data": {"n": n}
            });
            queue.progress(&job_id, step).await.unwrap();
        }
        queue.fail(&job_id, "boom".into()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        drop(frames);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(published.try_recv().is_err());
        assert_eq!(lifecycle.receiver_count(), 0);
    }
}
