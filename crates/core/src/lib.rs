// crates/core/src/lib.rs
pub mod bridge;
pub mod bus;
pub mod config;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod queue;
pub mod runner;
pub mod submit;
pub mod worker;

pub use bridge::{EventBridge, EventHandlers, RunResult, EVENTS_LOST_MESSAGE};
pub use bus::{
    subscribe_cancellation, CancellationBus, EventBus, InMemoryBus, LifecycleBus, RunRequestBus,
    Subscription,
};
pub use config::QueueConfig;
pub use deferred::Deferred;
pub use error::*;
pub use executor::RunDocumentJob;
pub use queue::{EnqueuedJob, InMemoryQueue, JobSnapshot, JobStatus, QueueDepth, WorkQueue};
pub use runner::{DocumentRunRequest, DocumentRunner, EchoRunner, RunOutcome, RunningDocument};
pub use submit::{DocumentRun, JobSubmitter};
pub use worker::{JobContext, JobProcessor, WorkerPool};
