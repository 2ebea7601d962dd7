//! Durable FIFO work queue contract and the in-process implementation.
//!
//! The queue owns lifecycle publication: it emits `queued` when a job is
//! added and `progress` / `completed` / `failed` as the worker reports back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;

use docrun_types::{JobId, LifecycleEvent, RunDocumentJobData};

use crate::bus::LifecycleBus;
use crate::config::DEFAULT_KEEP_FINISHED;
use crate::error::QueueError;

/// A job as handed out by [`WorkQueue::add`] and [`WorkQueue::next`].
#[derive(Debug, Clone)]
pub struct EnqueuedJob {
    /// Identity assigned by the queue. `None` means the backend accepted the
    /// payload without assigning an identity.
    pub id: Option<JobId>,
    pub name: String,
    pub data: RunDocumentJobData,
    /// Attempts started so far, including the current one.
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue-side status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Waiting or active jobs hold their identity.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }
}

/// Point-in-time view of a job, served by the jobs API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub progress_events: u64,
    pub failed_reason: Option<String>,
    pub enqueued_at: String,
    pub finished_at: Option<String>,
}

/// Live job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub waiting: usize,
    pub active: usize,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue `data` under `name` with identity `job_id`.
    async fn add(
        &self,
        name: &str,
        data: RunDocumentJobData,
        job_id: JobId,
    ) -> Result<EnqueuedJob, QueueError>;

    /// Wait for the next job. Returns `None` once the queue is closed.
    async fn next(&self) -> Option<EnqueuedJob>;

    async fn progress(&self, job_id: &JobId, data: Value) -> Result<(), QueueError>;

    async fn complete(&self, job_id: &JobId, returnvalue: String) -> Result<(), QueueError>;

    async fn fail(&self, job_id: &JobId, reason: String) -> Result<(), QueueError>;

    /// Put a failed attempt back at the tail of the queue.
    async fn retry(&self, job: EnqueuedJob) -> Result<(), QueueError>;

    fn get(&self, job_id: &JobId) -> Option<JobSnapshot>;

    /// The `completed` or `failed` event of a finished job, rebuilt for a
    /// subscriber that missed it. `Ok(None)` while the job is still live.
    fn terminal_event(&self, job_id: &JobId) -> Result<Option<LifecycleEvent>, QueueError>;

    /// Waiting and active jobs.
    fn active(&self) -> Vec<JobSnapshot>;

    fn depth(&self) -> QueueDepth {
        self.active()
            .iter()
            .fold(QueueDepth::default(), |mut depth, job| {
                match job.status {
                    JobStatus::Waiting => depth.waiting += 1,
                    _ => depth.active += 1,
                }
                depth
            })
    }

    /// Stop handing out jobs. Pending `next` calls return `None`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

struct JobRecord {
    name: String,
    status: JobStatus,
    attempts_made: u32,
    progress_events: u64,
    failed_reason: Option<String>,
    returnvalue: Option<String>,
    enqueued_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn waiting(name: &str, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Waiting,
            attempts_made: 0,
            progress_events: 0,
            failed_reason: None,
            returnvalue: None,
            enqueued_at,
            finished_at: None,
        }
    }

    fn terminal_event(&self, job_id: &JobId) -> Option<LifecycleEvent> {
        let job_id = job_id.clone();
        match self.status {
            JobStatus::Waiting | JobStatus::Active => None,
            JobStatus::Completed => Some(LifecycleEvent::Completed {
                job_id,
                returnvalue: self.returnvalue.clone().unwrap_or_default(),
            }),
            JobStatus::Failed => Some(LifecycleEvent::Failed {
                job_id,
                failed_reason: self.failed_reason.clone().unwrap_or_default(),
            }),
        }
    }

    fn snapshot(&self, job_id: &JobId) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.clone(),
            name: self.name.clone(),
            status: self.status,
            attempts_made: self.attempts_made,
            progress_events: self.progress_events,
            failed_reason: self.failed_reason.clone(),
            enqueued_at: self.enqueued_at.to_rfc3339(),
            finished_at: self.finished_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// In-process FIFO queue. Jobs survive as long as the process does; the
/// records of finished jobs are kept up to a retention count, oldest evicted
/// first.
pub struct InMemoryQueue {
    name: String,
    events: Arc<LifecycleBus>,
    waiting: Mutex<VecDeque<EnqueuedJob>>,
    notify: Notify,
    records: DashMap<JobId, JobRecord>,
    finished: Mutex<VecDeque<JobId>>,
    keep_finished: usize,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>, events: Arc<LifecycleBus>) -> Self {
        Self {
            name: name.into(),
            events,
            waiting: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            records: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            keep_finished: DEFAULT_KEEP_FINISHED,
            closed: AtomicBool::new(false),
        }
    }

    /// Keep at most `keep_finished` completed or failed records.
    pub fn with_retention(mut self, keep_finished: usize) -> Self {
        self.keep_finished = keep_finished;
        self
    }

    /// Number of jobs waiting to be picked up.
    pub fn len(&self) -> usize {
        match self.waiting.lock() {
            Ok(waiting) => waiting.len(),
            Err(e) => {
                tracing::error!("Mutex poisoned reading queue length: {e}");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, job: EnqueuedJob) -> Result<(), QueueError> {
        match self.waiting.lock() {
            Ok(mut waiting) => waiting.push_back(job),
            Err(e) => return Err(QueueError::Backend(format!("queue mutex poisoned: {e}"))),
        }
        self.notify.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<EnqueuedJob> {
        let mut job = match self.waiting.lock() {
            Ok(mut waiting) => waiting.pop_front()?,
            Err(e) => {
                tracing::error!("Mutex poisoned popping queue: {e}");
                return None;
            }
        };
        job.attempts_made += 1;
        if let Some(id) = &job.id {
            if let Some(mut record) = self.records.get_mut(id) {
                record.status = JobStatus::Active;
                record.attempts_made = job.attempts_made;
            }
        }
        Some(job)
    }

    fn finish(
        &self,
        job_id: &JobId,
        status: JobStatus,
        failed_reason: Option<String>,
        returnvalue: Option<String>,
    ) -> Result<(), QueueError> {
        {
            let mut record = self
                .records
                .get_mut(job_id)
                .ok_or_else(|| QueueError::NotFound {
                    job_id: job_id.clone(),
                })?;
            record.status = status;
            record.failed_reason = failed_reason;
            record.returnvalue = returnvalue;
            record.finished_at = Some(Utc::now());
        }
        self.retire(job_id);
        Ok(())
    }

    /// Remember a finished job and evict the oldest finished records past
    /// the retention count.
    fn retire(&self, job_id: &JobId) {
        let evicted: Vec<JobId> = match self.finished.lock() {
            Ok(mut finished) => {
                finished.push_back(job_id.clone());
                let excess = finished.len().saturating_sub(self.keep_finished);
                finished.drain(..excess).collect()
            }
            Err(e) => {
                tracing::error!("Mutex poisoned retiring job: {e}");
                return;
            }
        };
        for id in evicted {
            // The identity may have been reused by a live job since.
            if self
                .records
                .remove_if(&id, |_, record| !record.status.is_live())
                .is_some()
            {
                tracing::trace!(queue = %self.name, job_id = %id, "Evicted finished job record");
            }
        }
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(
        &self,
        name: &str,
        data: RunDocumentJobData,
        job_id: JobId,
    ) -> Result<EnqueuedJob, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed {
                queue: self.name.clone(),
            });
        }

        let enqueued_at = Utc::now();
        let entry = self.records.entry(job_id.clone());
        if let Entry::Occupied(existing) = &entry {
            if existing.get().status.is_live() {
                return Err(QueueError::Duplicate { job_id });
            }
        }
        entry.insert(JobRecord::waiting(name, enqueued_at));

        let job = EnqueuedJob {
            id: Some(job_id.clone()),
            name: name.to_string(),
            data,
            attempts_made: 0,
            enqueued_at,
        };
        self.push(job.clone())?;
        self.events.publish(LifecycleEvent::Queued {
            job_id: job_id.clone(),
        });
        tracing::debug!(queue = %self.name, job_id = %job_id, job_name = name, "Job added");
        Ok(job)
    }

    async fn next(&self) -> Option<EnqueuedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.pop() {
                return Some(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    async fn progress(&self, job_id: &JobId, data: Value) -> Result<(), QueueError> {
        {
            let mut record = self
                .records
                .get_mut(job_id)
                .ok_or_else(|| QueueError::NotFound {
                    job_id: job_id.clone(),
                })?;
            record.progress_events += 1;
        }
        self.events.publish(LifecycleEvent::Progress {
            job_id: job_id.clone(),
            data,
        });
        Ok(())
    }

    async fn complete(&self, job_id: &JobId, returnvalue: String) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Completed, None, Some(returnvalue.clone()))?;
        self.events.publish(LifecycleEvent::Completed {
            job_id: job_id.clone(),
            returnvalue,
        });
        tracing::debug!(queue = %self.name, job_id = %job_id, "Job completed");
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, reason: String) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Failed, Some(reason.clone()), None)?;
        self.events.publish(LifecycleEvent::Failed {
            job_id: job_id.clone(),
            failed_reason: reason,
        });
        tracing::debug!(queue = %self.name, job_id = %job_id, "Job failed");
        Ok(())
    }

    async fn retry(&self, job: EnqueuedJob) -> Result<(), QueueError> {
        if let Some(id) = &job.id {
            if let Some(mut record) = self.records.get_mut(id) {
                record.status = JobStatus::Waiting;
            }
        }
        self.push(job)
    }

    fn get(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.records
            .get(job_id)
            .map(|record| record.snapshot(job_id))
    }

    fn terminal_event(&self, job_id: &JobId) -> Result<Option<LifecycleEvent>, QueueError> {
        self.records
            .get(job_id)
            .map(|record| record.terminal_event(job_id))
            .ok_or_else(|| QueueError::NotFound {
                job_id: job_id.clone(),
            })
    }

    fn active(&self) -> Vec<JobSnapshot> {
        self.records
            .iter()
            .filter(|entry| entry.value().status.is_live())
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
