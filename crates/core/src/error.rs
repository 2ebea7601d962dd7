use docrun_types::JobId;
use thiserror::Error;

/// Errors raised by a work queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue {queue} is closed")]
    Closed { queue: String },

    #[error("Job {job_id} is already waiting or active")]
    Duplicate { job_id: JobId },

    #[error("Job not found: {job_id}")]
    NotFound { job_id: JobId },

    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// The queue did not accept a run. Nothing is attached when this is returned.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to enqueue document run job: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to enqueue document run job: no job id assigned")]
    MissingJobId,
}
