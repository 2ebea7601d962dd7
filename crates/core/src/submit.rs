//! Submitting document runs and wiring their lifecycle back to the caller.

use std::sync::Arc;

use serde_json::json;

use docrun_types::{
    DocumentRunParams, JobId, RunDocumentJobData, RunEvent, JOB_QUEUED_EVENT,
    RUN_DOCUMENT_API_JOB,
};

use crate::bridge::{EventBridge, EventHandlers, RunResult};
use crate::bus::{LifecycleBus, Subscription};
use crate::error::SubmitError;
use crate::queue::{EnqueuedJob, WorkQueue};

/// A run accepted by the queue.
///
/// Keep it alive for as long as the caller cares about the result; dropping
/// it detaches the event bridge.
pub struct DocumentRun {
    pub job: EnqueuedJob,
    pub queue: Arc<dyn WorkQueue>,
    pub result: RunResult,
    pub subscription: Subscription,
}

impl DocumentRun {
    pub fn job_id(&self) -> &JobId {
        self.subscription.job_id()
    }
}

impl std::fmt::Debug for DocumentRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRun")
            .field("job_id", self.job_id())
            .field("queue", &self.queue.name())
            .field("settled", &self.result.error.is_resolved())
            .finish()
    }
}

/// Enqueues document runs and attaches an event bridge to each.
#[derive(Clone)]
pub struct JobSubmitter {
    queue: Arc<dyn WorkQueue>,
    events: Arc<LifecycleBus>,
}

impl JobSubmitter {
    pub fn new(queue: Arc<dyn WorkQueue>, events: Arc<LifecycleBus>) -> Self {
        Self { queue, events }
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Enqueue a run of `params` and return its result slots.
    ///
    /// The lifecycle receiver is created before the job is added, so no
    /// event the queue publishes for this job can be missed. If the queue
    /// rejects the job, nothing stays attached to the bus.
    pub async fn enqueue_document_run(
        &self,
        params: DocumentRunParams,
        handlers: Option<EventHandlers>,
    ) -> Result<DocumentRun, SubmitError> {
        let job_id = JobId::generate(
            params.workspace_id,
            &params.commit_uuid,
            &params.document_uuid,
        );
        let handlers = handlers.unwrap_or_default();
        let receiver = self.events.subscribe();

        let data = RunDocumentJobData::new(params, job_id.clone());
        let job = match self.queue.add(RUN_DOCUMENT_API_JOB, data, job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(queue = %self.queue.name(), error = %e, "Document run rejected");
                return Err(e.into());
            }
        };
        let job_id = job.id.clone().ok_or(SubmitError::MissingJobId)?;

        if let Some(on_progress) = &handlers.on_progress {
            on_progress(RunEvent::new(
                JOB_QUEUED_EVENT,
                json!({ "jobId": job_id.as_str() }),
            ));
        }

        let result = RunResult::new();
        let subscription = EventBridge::new(job_id.clone(), result.clone(), handlers)
            .with_queue(Arc::clone(&self.queue))
            .attach(receiver);
        tracing::info!(queue = %self.queue.name(), job_id = %job_id, "Document run enqueued");

        Ok(DocumentRun {
            job,
            queue: Arc::clone(&self.queue),
            result,
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, InMemoryBus};
    use crate::error::QueueError;
    use crate::queue::{InMemoryQueue, JobSnapshot};
    use async_trait::async_trait;
    use docrun_types::{ChainStepResponse, JobReturnValue, LifecycleEvent};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    fn params() -> DocumentRunParams {
        DocumentRunParams {
            workspace_id: 7,
            document_uuid: "doc-uuid".into(),
            commit_uuid: "abcdef1234".into(),
            project_id: 3,
            ..Default::default()
        }
    }

    struct RejectingQueue;

    #[async_trait]
    impl WorkQueue for RejectingQueue {
        fn name(&self) -> &str {
            "rejecting"
        }
        async fn add(
            &self,
            _name: &str,
            _data: RunDocumentJobData,
            _job_id: JobId,
        ) -> Result<EnqueuedJob, QueueError> {
            Err(QueueError::Backend("connection refused".into()))
        }
        async fn next(&self) -> Option<EnqueuedJob> {
            None
        }
        async fn progress(&self, _job_id: &JobId, _data: Value) -> Result<(), QueueError> {
            Ok(())
        }
        async fn complete(&self, _job_id: &JobId, _returnvalue: String) -> Result<(), QueueError> {
            Ok(())
        }
        async fn fail(&self, _job_id: &JobId, _reason: String) -> Result<(), QueueError> {
            Ok(())
        }
        async fn retry(&self, _job: EnqueuedJob) -> Result<(), QueueError> {
            Ok(())
        }
        fn get(&self, _job_id: &JobId) -> Option<JobSnapshot> {
            None
        }
        fn terminal_event(&self, job_id: &JobId) -> Result<Option<LifecycleEvent>, QueueError> {
            Err(QueueError::NotFound {
                job_id: job_id.clone(),
            })
        }
        fn active(&self) -> Vec<JobSnapshot> {
            Vec::new()
        }
        fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_enqueue_emits_job_queued_then_settles() {
        let bus = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let queue = Arc::new(InMemoryQueue::new("documents", bus.clone()));
        let submitter = JobSubmitter::new(queue.clone(), bus.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let run = submitter
            .enqueue_document_run(
                params(),
                Some(EventHandlers::new().on_progress(move |e| sink.lock().unwrap().push(e))),
            )
            .await
            .unwrap();

        let job_id = run.job_id().clone();
        assert!(job_id.as_str().starts_with("workspace:7:commit:abcdef1:document:doc-uuid:"));
        assert_eq!(run.job.name, RUN_DOCUMENT_API_JOB);
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].event, JOB_QUEUED_EVENT);
            assert_eq!(seen[0].data["jobId"], job_id.as_str());
        }

        let job = queue.next().await.unwrap();
        assert_eq!(job.data.job_id, job_id);
        let value = JobReturnValue {
            success: true,
            response: Some(ChainStepResponse::text("hi")),
            tool_calls: vec![],
        };
        queue
            .complete(&job_id, serde_json::to_string(&value).unwrap())
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), run.result.wait())
            .await
            .expect("run did not settle")
            .unwrap();
        assert_eq!(outcome.response.unwrap().text, "hi");
    }

    #[tokio::test]
    async fn test_rejected_submission_attaches_nothing() {
        let bus = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let submitter = JobSubmitter::new(Arc::new(RejectingQueue), bus.clone());

        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let err = submitter
            .enqueue_document_run(
                params(),
                Some(EventHandlers::new().on_progress(move |_| *flag.lock().unwrap() = true)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Queue(QueueError::Backend(_))));
        assert_eq!(bus.receiver_count(), 0);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_events_published_during_add_are_not_missed() {
        // A worker may finish the job before `add` returns to the submitter.
        struct InstantQueue {
            inner: InMemoryQueue,
        }

        #[async_trait]
        impl WorkQueue for InstantQueue {
            fn name(&self) -> &str {
                self.inner.name()
            }
            async fn add(
                &self,
                name: &str,
                data: RunDocumentJobData,
                job_id: JobId,
            ) -> Result<EnqueuedJob, QueueError> {
                let job = self.inner.add(name, data, job_id.clone()).await?;
                self.inner.next().await;
                self.inner.fail(&job_id, "instant failure".into()).await?;
                Ok(job)
            }
            async fn next(&self) -> Option<EnqueuedJob> {
                self.inner.next().await
            }
            async fn progress(&self, job_id: &JobId, data: Value) -> Result<(), QueueError> {
                self.inner.progress(job_id, data).await
            }
            async fn complete(&self, job_id: &JobId, returnvalue: String) -> Result<(), QueueError> {
                self.inner.complete(job_id, returnvalue).await
            }
            async fn fail(&self, job_id: &JobId, reason: String) -> Result<(), QueueError> {
                self.inner.fail(job_id, reason).await
            }
            async fn retry(&self, job: EnqueuedJob) -> Result<(), QueueError> {
                self.inner.retry(job).await
            }
            fn get(&self, job_id: &JobId) -> Option<JobSnapshot> {
                self.inner.get(job_id)
            }
            fn terminal_event(
                &self,
                job_id: &JobId,
            ) -> Result<Option<LifecycleEvent>, QueueError> {
                self.inner.terminal_event(job_id)
            }
            fn active(&self) -> Vec<JobSnapshot> {
                self.inner.active()
            }
            fn close(&self) {
                self.inner.close()
            }
            fn is_closed(&self) -> bool {
                self.inner.is_closed()
            }
        }

        let bus = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let queue = Arc::new(InstantQueue {
            inner: InMemoryQueue::new("documents", bus.clone()),
        });
        let submitter = JobSubmitter::new(queue, bus.clone());
        let run = submitter.enqueue_document_run(params(), None).await.unwrap();

        let error = tokio::time::timeout(Duration::from_secs(1), run.result.error.wait())
            .await
            .expect("failure was missed")
            .unwrap();
        assert_eq!(error.to_string(), "instant failure");
    }

    #[tokio::test]
    async fn test_dropping_run_detaches_bridge() {
        let bus = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let queue = Arc::new(InMemoryQueue::new("documents", bus.clone()));
        let submitter = JobSubmitter::new(queue, bus.clone());

        let run = submitter.enqueue_document_run(params(), None).await.unwrap();
        assert_eq!(bus.receiver_count(), 1);
        drop(run);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.receiver_count(), 0);
    }
}
