//! Prometheus scrape endpoint, served at `GET /metrics` without the `/api`
//! prefix.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::{ApiError, ApiResult};
use crate::metrics::{record_queue_depth, render_metrics};
use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Queue gauges are sampled here rather than on every enqueue.
async fn scrape(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let queue = state.queue();
    record_queue_depth(queue.name(), queue.depth());
    let body = render_metrics()
        .ok_or_else(|| ApiError::Unavailable("metrics recorder not installed".into()))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body).into_response())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::InMemoryDocuments;
    use crate::metrics::{init_metrics, record_submitted, RunMode};
    use crate::version::DEFAULT_LEGACY_THRESHOLD;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use docrun_core::{InMemoryBus, InMemoryQueue, WorkQueue};
    use docrun_observability::TracingReporter;
    use docrun_types::{
        CancelJob, DocumentRunParams, JobId, LifecycleEvent, RunDocumentJobData,
        RUN_DOCUMENT_API_JOB,
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_scrape_renders_counters_and_queue_depth() {
        init_metrics();
        record_submitted(RunMode::Blocking);

        let lifecycle = Arc::new(InMemoryBus::<LifecycleEvent>::default());
        let queue = Arc::new(InMemoryQueue::new("scraped", lifecycle.clone()));
        let data = RunDocumentJobData::new(DocumentRunParams::default(), JobId::from("m1"));
        queue
            .add(RUN_DOCUMENT_API_JOB, data, JobId::from("m1"))
            .await
            .unwrap();
        let state = AppState::new(
            queue,
            lifecycle,
            Arc::new(InMemoryBus::<CancelJob>::default()),
            Arc::new(InMemoryDocuments::new()),
            Arc::new(TracingReporter),
            DEFAULT_LEGACY_THRESHOLD,
        );

        let response = router()
            .with_state(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], PROMETHEUS_TEXT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("docrun_runs_submitted_total"));
        assert!(text.contains(r#"docrun_queue_jobs{queue="scraped",status="waiting"} 1"#));
    }
}
