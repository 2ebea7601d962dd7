// crates/server/src/routes/health.rs
//! Health check endpoint.
//!
//! Reports whether the queue still accepts runs, so a load balancer can stop
//! routing to an instance that is draining.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use docrun_core::{QueueDepth, WorkQueue};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ok,
    /// The queue is closed and live jobs are finishing.
    Draining,
}

impl Readiness {
    fn status_code(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub name: String,
    #[serde(flatten)]
    pub depth: QueueDepth,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub queue: QueueHealth,
}

impl HealthResponse {
    fn observe(queue: &dyn WorkQueue, uptime_secs: u64) -> Self {
        let status = if queue.is_closed() {
            Readiness::Draining
        } else {
            Readiness::Ok
        };
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs,
            queue: QueueHealth {
                name: queue.name().to_string(),
                depth: queue.depth(),
            },
        }
    }
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse::observe(state.queue().as_ref(), state.uptime_secs());
    if response.status == Readiness::Draining {
        tracing::debug!(queue = %response.queue.name, "Health check while draining");
    }
    (response.status.status_code(), Json(response))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
