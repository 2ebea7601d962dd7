//! The generation seam: what a worker calls to actually run a document.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use docrun_types::{
    ChainStepResponse, LogSource, RunDocumentJobData, RunError, RunEvent, ToolCall,
};

/// How a worker answers a tool call the model makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolHandler {
    /// Leave the call pending for the requesting client to answer.
    AwaitClientResult,
}

pub type ToolHandlers = BTreeMap<String, ToolHandler>;

/// Every tool the client declared is answered by the client.
pub fn build_client_tool_handlers(tools: &[String]) -> ToolHandlers {
    tools
        .iter()
        .map(|name| (name.clone(), ToolHandler::AwaitClientResult))
        .collect()
}

/// Inputs of one document run, as resolved by the worker.
#[derive(Debug, Clone)]
pub struct DocumentRunRequest {
    pub workspace_id: u64,
    pub project_id: u64,
    pub document_uuid: String,
    pub commit_uuid: String,
    pub parameters: Map<String, Value>,
    pub custom_identifier: Option<String>,
    pub user_message: Option<String>,
    pub source: LogSource,
    pub tools: ToolHandlers,
}

impl From<&RunDocumentJobData> for DocumentRunRequest {
    fn from(data: &RunDocumentJobData) -> Self {
        Self {
            workspace_id: data.workspace_id,
            project_id: data.project_id,
            document_uuid: data.document_uuid.clone(),
            commit_uuid: data.commit_uuid.clone(),
            parameters: data.parameters.clone(),
            custom_identifier: data.custom_identifier.clone(),
            user_message: data.user_message.clone(),
            source: data.source,
            tools: build_client_tool_handlers(&data.tools),
        }
    }
}

/// Final values of a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub response: Option<ChainStepResponse>,
    pub tool_calls: Vec<ToolCall>,
}

/// A run in flight: its step stream and its eventual outcome.
///
/// Drain `events` before awaiting `outcome`.
pub struct RunningDocument {
    pub events: BoxStream<'static, RunEvent>,
    pub outcome: BoxFuture<'static, Result<RunOutcome, RunError>>,
}

#[async_trait]
pub trait DocumentRunner: Send + Sync {
    /// Start a run. `cancel` fires when a client asks to abort; runners are
    /// expected to observe it and finish with [`RunError::Aborted`].
    async fn run(
        &self,
        request: DocumentRunRequest,
        cancel: CancellationToken,
    ) -> Result<RunningDocument, RunError>;
}

/// Development runner: streams the user message (or the parameters) back
/// word by word and asks every declared client tool once.
#[derive(Debug, Clone)]
pub struct EchoRunner {
    step_delay: Duration,
}

impl EchoRunner {
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(25),
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }
}

impl Default for EchoRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn echo_text(request: &DocumentRunRequest) -> String {
    match &request.user_message {
        Some(message) => message.clone(),
        None => Value::Object(request.parameters.clone()).to_string(),
    }
}

#[async_trait]
impl DocumentRunner for EchoRunner {
    async fn run(
        &self,
        request: DocumentRunRequest,
        cancel: CancellationToken,
    ) -> Result<RunningDocument, RunError> {
        let text = echo_text(&request);
        let tool_calls: Vec<ToolCall> = request
            .tools
            .keys()
            .enumerate()
            .map(|(i, name)| ToolCall {
                id: format!("call_{i}"),
                name: name.clone(),
                arguments: json!({}),
            })
            .collect();
        let step_delay = self.step_delay;

        let (step_tx, step_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = async {
                for word in text.split_whitespace() {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RunError::Aborted),
                        _ = tokio::time::sleep(step_delay) => {}
                    }
                    let step = RunEvent::new(
                        "provider-event",
                        json!({ "type": "text-delta", "textDelta": word }),
                    );
                    if step_tx.send(step).await.is_err() {
                        return Err(RunError::Aborted);
                    }
                }
                let finished = RunEvent::new(
                    "chain-event",
                    json!({ "type": "chain-completed", "toolCalls": tool_calls }),
                );
                let _ = step_tx.send(finished).await;
                Ok(RunOutcome {
                    response: Some(ChainStepResponse::text(text.clone())),
                    tool_calls,
                })
            }
            .await;
            let _ = done_tx.send(result);
        });

        let events = futures_util::stream::unfold(step_rx, |mut rx| async move {
            rx.recv().await.map(|step| (step, rx))
        })
        .boxed();
        let outcome = async move {
            done_rx
                .await
                .unwrap_or_else(|_| Err(RunError::from_reason("Runner stopped without a result")))
        }
        .boxed();

        Ok(RunningDocument { events, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: Option<&str>, tools: &[&str]) -> DocumentRunRequest {
        DocumentRunRequest {
            workspace_id: 1,
            project_id: 1,
            document_uuid: "doc".into(),
            commit_uuid: "commit".into(),
            parameters: Map::new(),
            custom_identifier: None,
            user_message: message.map(str::to_string),
            source: LogSource::Api,
            tools: build_client_tool_handlers(
                &tools.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            ),
        }
    }

    #[test]
    fn test_client_tool_handlers() {
        let handlers = build_client_tool_handlers(&["search".into(), "lookup".into()]);
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers["search"], ToolHandler::AwaitClientResult);
    }

    #[tokio::test]
    async fn test_echo_runner_streams_words() {
        let runner = EchoRunner::new().with_step_delay(Duration::from_millis(1));
        let running = runner
            .run(request(Some("hello brave world"), &["search"]), CancellationToken::new())
            .await
            .unwrap();

        let steps: Vec<RunEvent> = running.events.collect().await;
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].data["textDelta"], "hello");
        assert_eq!(steps[3].event, "chain-event");

        let outcome = running.outcome.await.unwrap();
        assert_eq!(outcome.response.unwrap().text, "hello brave world");
        assert_eq!(outcome.tool_calls[0].name, "search");
    }

    #[tokio::test]
    async fn test_echo_runner_honours_cancellation() {
        let runner = EchoRunner::new().with_step_delay(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let running = runner
            .run(request(Some("a b c d e f"), &[]), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();

        let steps: Vec<RunEvent> = running.events.collect().await;
        assert!(steps.len() < 6);
        assert_eq!(running.outcome.await.unwrap_err(), RunError::Aborted);
    }
}
