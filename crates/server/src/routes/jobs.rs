// crates/server/src/routes/jobs.rs
//! API routes for document run jobs.
//!
//! - GET /jobs - List waiting and active jobs
//! - GET /jobs/stream - SSE stream of every lifecycle event
//! - GET /jobs/{job_id} - Snapshot of one job
//! - POST /jobs/{job_id}/cancel - Ask the worker running a job to abort it

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use docrun_core::{EventBus, JobSnapshot};
use docrun_types::{CancelJob, JobId};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CancelResponse {
    pub job_id: String,
    pub delivered: usize,
}

/// GET /api/jobs - List waiting and active jobs.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.queue().active())
}

/// GET /api/jobs/{job_id} - Snapshot of one job.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .queue()
        .get(&JobId::from(job_id.as_str()))
        .map(Json)
        .ok_or(ApiError::JobNotFound(job_id))
}

/// POST /api/jobs/{job_id}/cancel - Publish a cancellation for a known job.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let id = JobId::from(job_id.as_str());
    if state.queue().get(&id).is_none() {
        return Err(ApiError::JobNotFound(job_id));
    }

    let delivered = state.cancellations.publish(CancelJob { job_id: id });
    metrics::record_cancellation("api");
    tracing::info!(job_id = %job_id, delivered, "Cancellation requested over the API");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse { job_id, delivered }),
    ))
}

/// GET /api/jobs/stream - SSE stream of all lifecycle events.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.lifecycle.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event(event.topic()).data(json));
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Job stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}
