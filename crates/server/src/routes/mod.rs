//! API route handlers for the document run server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod run;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: API routes under the /api prefix and the
/// Prometheus endpoint at the root.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/v3/projects/{project_id}/versions/{version_uuid}/documents/run - Run a document
/// - GET  /api/jobs - Waiting and active jobs
/// - GET  /api/jobs/stream - SSE stream of lifecycle events
/// - GET  /api/jobs/{job_id} - One job
/// - POST /api/jobs/{job_id}/cancel - Cancel a job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", run::router())
        .nest("/api", jobs::router())
        .merge(metrics::router())
        .with_state(state)
}
