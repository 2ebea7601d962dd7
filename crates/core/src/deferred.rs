//! Single-resolution result slots.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

/// A value that is resolved at most once and can be awaited any number of times.
///
/// Clones share the same slot. The first `resolve` wins; later calls are
/// no-ops and every reader observes the first value.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: OnceLock<T>,
    notify: Notify,
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the slot. Returns `false` if it was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let won = self.inner.value.set(value).is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    /// Current value without waiting.
    pub fn get(&self) -> Option<T> {
        self.inner.value.get().cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// Wait until the slot is resolved and return its value.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a resolve in between is not missed.
            notified.as_mut().enable();
            if let Some(value) = self.inner.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("value", &self.inner.value.get())
            .finish()
    }
}
