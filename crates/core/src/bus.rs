//! Publish/subscribe buses shared by submitters and workers.
//!
//! Two buses carry job traffic: the lifecycle bus (queued/progress/
//! completed/failed per job) and the cancellation bus. A third announces
//! API run requests. All are injected capabilities so a cross-process
//! transport can stand in for the in-memory one.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docrun_types::{CancelJob, DocumentRunRequested, JobId, LifecycleEvent};

/// Default buffered events per subscriber before it starts lagging.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Broadcast channel keyed by nothing: subscribers filter by job identity.
pub trait EventBus<E>: Send + Sync {
    /// Publish to every current subscriber. Returns how many received it.
    /// Subscribers attached later never see the event.
    fn publish(&self, event: E) -> usize;

    /// Attach a new subscriber. Events published from now on are buffered
    /// for it.
    fn subscribe(&self) -> broadcast::Receiver<E>;

    fn receiver_count(&self) -> usize;
}

pub type LifecycleBus = dyn EventBus<LifecycleEvent>;
pub type CancellationBus = dyn EventBus<CancelJob>;
pub type RunRequestBus = dyn EventBus<DocumentRunRequested>;

/// In-process bus backed by `tokio::sync::broadcast`.
pub struct InMemoryBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> InMemoryBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl<E: Clone + Send + 'static> Default for InMemoryBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl<E: Clone + Send + 'static> EventBus<E> for InMemoryBus<E> {
    fn publish(&self, event: E) -> usize {
        // No subscribers is fine.
        self.tx.send(event).unwrap_or(0)
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A listener task attached to a bus on behalf of one job.
///
/// Dropping the subscription detaches the listener.
pub struct Subscription {
    job_id: JobId,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(job_id: JobId, handle: JoinHandle<()>) -> Self {
        Self { job_id, handle }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether the listener already detached on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Derive a cancellation token for `job_id` from the cancellation bus.
///
/// The token fires on the first `CancelJob` for this identity published
/// after this call. Drop the returned subscription once the job is done.
pub fn subscribe_cancellation(
    bus: &CancellationBus,
    job_id: JobId,
) -> (CancellationToken, Subscription) {
    let mut rx = bus.subscribe();
    let token = CancellationToken::new();
    let signal = token.clone();
    let id = job_id.clone();

    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) if message.job_id == id => {
                    tracing::info!(job_id = %id, "Cancellation requested");
                    signal.cancel();
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(job_id = %id, skipped = n, "Cancellation listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    (token, Subscription::new(job_id, handle))
}
