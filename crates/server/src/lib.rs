// crates/server/src/lib.rs
//! Document run server library.
//!
//! This crate provides the Axum-based HTTP surface over the job-backed
//! document runner: a run endpoint answering either with a push stream of
//! frames or with one JSON body, plus job inspection and cancellation.

pub mod config;
pub mod documents;
pub mod error;
pub mod metrics;
pub mod presenter;
pub mod routes;
pub mod state;
pub mod streaming;
pub mod version;

pub use config::ServerConfig;
pub use documents::{DocumentEntry, DocumentResolver, InMemoryDocuments};
pub use error::*;
pub use routes::api_routes;
pub use state::{AppState, InProcess};
pub use streaming::StreamingAdapter;
pub use version::{ResponseShape, SdkVersion};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, document runs, jobs) and `/metrics`
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
