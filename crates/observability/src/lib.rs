//! Logging and fault reporting for docrun binaries.
//!
//! `init` installs the global tracing subscriber and, when `SENTRY_DSN` is
//! set, a Sentry client whose tracing layer turns `error!` events into
//! Sentry events and lower levels into breadcrumbs.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "warn,docrun=info";

/// Keeps the Sentry client alive. Hold it for the lifetime of `main`.
pub struct ObservabilityGuard {
    sentry: Option<sentry::ClientInitGuard>,
}

impl ObservabilityGuard {
    pub fn sentry_enabled(&self) -> bool {
        self.sentry.as_ref().is_some_and(|guard| guard.is_enabled())
    }
}

/// Install tracing (filtered by `RUST_LOG`, falling back to
/// `default_filter`) and Sentry if configured.
pub fn init(default_filter: &str) -> anyhow::Result<ObservabilityGuard> {
    let sentry = sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: std::env::var("SENTRY_ENVIRONMENT").ok().map(Into::into),
                attach_stacktrace: true,
                ..Default::default()
            },
        ))
    });

    let sentry_layer = sentry.as_ref().map(|_| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
            tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
            _ => sentry_tracing::EventFilter::Ignore,
        })
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(sentry_layer)
        .try_init()?;

    let guard = ObservabilityGuard { sentry };
    tracing::debug!(sentry = guard.sentry_enabled(), "Observability initialized");
    Ok(guard)
}

fn sentry_dsn() -> Option<String> {
    std::env::var("SENTRY_DSN")
        .ok()
        .filter(|dsn| !dsn.trim().is_empty())
}

/// An internal fault worth a human's attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub component: &'static str,
    pub message: String,
    pub job_id: Option<String>,
}

impl Fault {
    pub fn new(component: &'static str, message: impl Into<String>) -> Self {
        Self {
            component,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Where internal faults go. Client disconnects are never reported.
pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: Fault);
}

/// Logs faults at error level only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, fault: Fault) {
        tracing::error!(
            component = fault.component,
            job_id = fault.job_id.as_deref().unwrap_or(""),
            "{}",
            fault.message
        );
    }
}

/// Sends faults to Sentry with component and job tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentryReporter;

impl FaultReporter for SentryReporter {
    fn report(&self, fault: Fault) {
        TracingReporter.report(fault.clone());
        sentry::with_scope(
            |scope| {
                scope.set_tag("component", fault.component);
                if let Some(job_id) = &fault.job_id {
                    scope.set_tag("job_id", job_id);
                }
            },
            || sentry::capture_message(&fault.message, sentry::Level::Error),
        );
    }
}

/// The reporter matching how the process was initialized.
pub fn reporter(guard: &ObservabilityGuard) -> Arc<dyn FaultReporter> {
    if guard.sentry_enabled() {
        Arc::new(SentryReporter)
    } else {
        Arc::new(TracingReporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_builder() {
        let fault = Fault::new("streaming", "submit failed").with_job_id("job-1");
        assert_eq!(fault.component, "streaming");
        assert_eq!(fault.job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_reporter_without_sentry_is_tracing() {
        let guard = ObservabilityGuard { sentry: None };
        assert!(!guard.sentry_enabled());
        // Must not panic with no subscriber and no client installed.
        reporter(&guard).report(Fault::new("test", "boom"));
        SentryReporter.report(Fault::new("test", "boom"));
    }
}
