//! Document run endpoint.
//!
//! - POST /v3/projects/{project_id}/versions/{version_uuid}/documents/run
//!
//! With `"stream": true` the run is delivered as server-sent events, one per
//! frame. Otherwise the handler waits for the run and answers with a body
//! shaped for the caller's SDK version.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};

use docrun_core::EventBus;
use docrun_types::{DocumentRunParams, DocumentRunRequested, LogSource};

use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, RunMode, RunOutcomeLabel, RunTimer};
use crate::presenter::present;
use crate::state::AppState;
use crate::streaming::sse_event;
use crate::version::{ResponseShape, SDK_VERSION_HEADER};

/// Header carrying the caller's workspace.
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub path: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub custom_identifier: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, rename = "__internal")]
    pub internal: Option<InternalOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InternalOptions {
    #[serde(default)]
    pub source: Option<LogSource>,
}

fn workspace_id(headers: &HeaderMap) -> ApiResult<u64> {
    headers
        .get(WORKSPACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing or invalid {WORKSPACE_HEADER}")))
}

/// POST /api/v3/projects/{project_id}/versions/{version_uuid}/documents/run
async fn run_document(
    State(state): State<Arc<AppState>>,
    Path((project_id, version_uuid)): Path<(u64, String)>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> ApiResult<Response> {
    let workspace_id = workspace_id(&headers)?;
    let document_uuid = state
        .documents
        .resolve(project_id, &version_uuid, &request.path)
        .ok_or_else(|| ApiError::DocumentNotFound(request.path.clone()))?;

    let requested_source = request.internal.as_ref().and_then(|internal| internal.source);
    let mut params = DocumentRunParams {
        workspace_id,
        document_uuid,
        commit_uuid: version_uuid,
        project_id,
        parameters: request.parameters,
        custom_identifier: request.custom_identifier,
        tools: request.tools,
        user_message: request.user_message,
        source: requested_source.unwrap_or_default(),
    };

    // Only callers that name the API source explicitly are announced.
    if requested_source == Some(LogSource::Api) {
        let listeners = state
            .run_requests
            .publish(DocumentRunRequested::new(&params));
        tracing::info!(
            workspace_id,
            project_id,
            document_uuid = %params.document_uuid,
            stream = request.stream,
            listeners,
            "document run requested"
        );
    }

    if request.stream {
        let frames = state.streaming.stream(params).map(sse_event);
        return Ok(Sse::new(frames)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    // Blocking callers cannot answer client tool requests.
    params.tools = Vec::new();
    let shape = ResponseShape::negotiate(
        headers
            .get(SDK_VERSION_HEADER)
            .and_then(|v| v.to_str().ok()),
        state.legacy_sdk_threshold,
    );

    let timer = RunTimer::new(RunMode::Blocking);
    let run = state.submitter.enqueue_document_run(params, None).await?;
    metrics::record_submitted(RunMode::Blocking);

    match run.result.wait().await {
        Ok(outcome) => {
            timer.finish(RunOutcomeLabel::Completed);
            Ok(Json(present(outcome, shape)?).into_response())
        }
        Err(error) => {
            timer.finish(if error.is_abort() {
                RunOutcomeLabel::Aborted
            } else {
                RunOutcomeLabel::Failed
            });
            Err(ApiError::Run(error))
        }
    }
}

/// Create the document run router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/v3/projects/{project_id}/versions/{version_uuid}/documents/run",
        post(run_document),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::InMemoryDocuments;
    use crate::state::InProcess;
    use crate::version::DEFAULT_LEGACY_THRESHOLD;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use docrun_core::{EchoRunner, QueueConfig};
    use docrun_observability::TracingReporter;
    use std::time::Duration;
    use tower::ServiceExt;

    const RUN_URI: &str = "/v3/projects/7/versions/live/documents/run";

    fn in_process() -> InProcess {
        InProcess::start(
            &QueueConfig::default(),
            Arc::new(EchoRunner::new().with_step_delay(Duration::from_millis(1))),
            Arc::new(InMemoryDocuments::new().with_document(7, "greeting", "doc-1")),
            Arc::new(TracingReporter),
            DEFAULT_LEGACY_THRESHOLD,
        )
    }

    fn post_run(body: Value, workspace: Option<&str>, sdk: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(RUN_URI)
            .header("content-type", "application/json");
        if let Some(workspace) = workspace {
            builder = builder.header(WORKSPACE_HEADER, workspace);
        }
        if let Some(sdk) = sdk {
            builder = builder.header(SDK_VERSION_HEADER, sdk);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(runtime: &InProcess, request: Request<Body>) -> (StatusCode, Value) {
        let app = router().with_state(runtime.state.clone());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[test]
    fn test_request_deserialization() {
        let request: RunRequest = serde_json::from_value(serde_json::json!({
            "path": "greeting",
            "userMessage": "hi",
            "__internal": {"source": "playground"}
        }))
        .unwrap();
        assert_eq!(request.user_message.as_deref(), Some("hi"));
        assert!(!request.stream);
        assert!(request.tools.is_empty());
        assert_eq!(
            request.internal.and_then(|i| i.source),
            Some(LogSource::Playground)
        );
    }

    #[tokio::test]
    async fn test_missing_workspace_is_unauthorized() {
        let runtime = in_process();
        let (status, _) = send(
            &runtime,
            post_run(serde_json::json!({"path": "greeting"}), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let runtime = in_process();
        let (status, json) = send(
            &runtime,
            post_run(serde_json::json!({"path": "missing"}), Some("1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Document not found");
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_blocking_run_current_shape() {
        let runtime = in_process();
        let (status, json) = send(
            &runtime,
            post_run(
                serde_json::json!({"path": "greeting", "userMessage": "hello there", "tools": ["search"]}),
                Some("1"),
                Some("5.2.0"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"]["text"], "hello there");
        assert!(json.get("toolCalls").is_none());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_blocking_run_legacy_shape_drops_tools() {
        let runtime = in_process();
        let (status, json) = send(
            &runtime,
            post_run(
                serde_json::json!({"path": "greeting", "userMessage": "hello", "tools": ["search"]}),
                Some("1"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"]["text"], "hello");
        assert_eq!(json["toolCalls"], serde_json::json!([]));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_api_source_announces_run_request() {
        let runtime = in_process();
        let mut requests = runtime.state.run_requests.subscribe();
        let (status, _) = send(
            &runtime,
            post_run(
                serde_json::json!({
                    "path": "greeting",
                    "parameters": {"name": "Ada"},
                    "__internal": {"source": "api"}
                }),
                Some("1"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let announced = requests.try_recv().unwrap();
        assert_eq!(announced.workspace_id, 1);
        assert_eq!(announced.project_id, 7);
        assert_eq!(announced.commit_uuid, "live");
        assert_eq!(announced.document_uuid, "doc-1");
        assert_eq!(announced.parameters["name"], "Ada");
        assert!(requests.try_recv().is_err());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_without_explicit_api_source_is_not_announced() {
        let runtime = in_process();
        let mut requests = runtime.state.run_requests.subscribe();
        for body in [
            serde_json::json!({"path": "greeting"}),
            serde_json::json!({"path": "greeting", "__internal": {"source": "playground"}}),
        ] {
            let (status, _) = send(&runtime, post_run(body, Some("1"), None)).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert!(requests.try_recv().is_err());
        runtime.shutdown().await;
    }
}
