//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Run lifecycle counters and the run duration histogram
//! - Queue depth gauges, refreshed on every scrape
//! - `RunTimer` for timing a run from submission to its terminal outcome

use docrun_core::QueueDepth;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "docrun_runs_submitted_total",
        "Document runs accepted by the queue, by delivery mode"
    );
    describe_counter!(
        "docrun_runs_finished_total",
        "Document runs that reached a terminal outcome"
    );
    describe_counter!(
        "docrun_cancellations_published_total",
        "Cancellation requests published on the cancellation bus"
    );
    describe_gauge!(
        "docrun_queue_jobs",
        "Live jobs in the work queue, by status"
    );
    describe_histogram!(
        "docrun_run_duration_seconds",
        "Time from submission to terminal outcome in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// How the caller receives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Streaming,
    Blocking,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Blocking => "blocking",
        }
    }
}

/// Terminal outcome as seen by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcomeLabel {
    Completed,
    Failed,
    Aborted,
    Disconnected,
}

impl RunOutcomeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Disconnected => "disconnected",
        }
    }
}

pub fn record_queue_depth(queue: &str, depth: QueueDepth) {
    gauge!("docrun_queue_jobs", "queue" => queue.to_string(), "status" => "waiting")
        .set(depth.waiting as f64);
    gauge!("docrun_queue_jobs", "queue" => queue.to_string(), "status" => "active")
        .set(depth.active as f64);
}

pub fn record_submitted(mode: RunMode) {
    counter!("docrun_runs_submitted_total", "mode" => mode.as_str()).increment(1);
}

/// `source` is what asked for the cancellation: `disconnect` or `api`.
pub fn record_cancellation(source: &'static str) {
    counter!("docrun_cancellations_published_total", "source" => source).increment(1);
}

/// Times a run from submission to its terminal outcome.
///
/// Usage:
/// ```ignore
/// let timer = RunTimer::new(RunMode::Streaming);
/// // ... wait for the run ...
/// timer.finish(RunOutcomeLabel::Completed);
/// ```
pub struct RunTimer {
    mode: RunMode,
    start: Instant,
}

impl RunTimer {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: RunOutcomeLabel) {
        let mode = self.mode.as_str();
        let outcome = outcome.as_str();
        counter!("docrun_runs_finished_total", "mode" => mode, "outcome" => outcome).increment(1);
        histogram!("docrun_run_duration_seconds", "mode" => mode, "outcome" => outcome)
            .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_timer() {
        // Just test that RunTimer doesn't panic without a recorder
        let timer = RunTimer::new(RunMode::Blocking);
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.finish(RunOutcomeLabel::Completed);
        record_submitted(RunMode::Streaming);
        record_cancellation("api");
    }

    #[test]
    fn test_labels() {
        assert_eq!(RunMode::Streaming.as_str(), "streaming");
        assert_eq!(RunOutcomeLabel::Disconnected.as_str(), "disconnected");
    }
}
