//! Messages carried by the lifecycle bus and the cancellation bus.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DocumentRunParams, JobId, RunEvent};

/// Lifecycle notification published by the work queue for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    Queued { job_id: JobId },
    Progress { job_id: JobId, data: Value },
    Completed { job_id: JobId, returnvalue: String },
    Failed { job_id: JobId, failed_reason: String },
}

impl LifecycleEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Queued { job_id }
            | Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }

    /// Bus topic name, used in logs.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Shapes of `progress` data the submitter forwards to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEnvelope {
    StreamEvent { event: String, data: Value },
    Error { event: String, data: Value },
}

impl ProgressEnvelope {
    /// Decode a raw progress value. Unknown shapes yield `None`.
    pub fn decode(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn into_run_event(self) -> RunEvent {
        match self {
            Self::StreamEvent { event, data } | Self::Error { event, data } => {
                RunEvent { event, data }
            }
        }
    }
}

impl From<RunEvent> for ProgressEnvelope {
    fn from(step: RunEvent) -> Self {
        Self::StreamEvent {
            event: step.event,
            data: step.data,
        }
    }
}

/// Announces a run requested through the public API, before it is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRunRequested {
    pub workspace_id: u64,
    pub project_id: u64,
    pub commit_uuid: String,
    pub document_uuid: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl DocumentRunRequested {
    pub fn new(params: &DocumentRunParams) -> Self {
        Self {
            workspace_id: params.workspace_id,
            project_id: params.project_id,
            commit_uuid: params.commit_uuid.clone(),
            document_uuid: params.document_uuid.clone(),
            parameters: params.parameters.clone(),
        }
    }
}

/// Request to abort a running job, broadcast on the cancellation bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelJob {
    pub job_id: JobId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_event_wire_shape() {
        let event = LifecycleEvent::Failed {
            job_id: JobId::from("j1"),
            failed_reason: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"kind": "failed", "jobId": "j1", "failedReason": "boom"}));
        assert!(event.is_terminal());
        assert_eq!(event.topic(), "failed");
    }

    #[test]
    fn test_progress_envelope_decode() {
        let raw = json!({"type": "stream_event", "event": "provider-event", "data": {"text": "a"}});
        let step = ProgressEnvelope::decode(&raw).unwrap().into_run_event();
        assert_eq!(step.event, "provider-event");
        assert_eq!(step.data, json!({"text": "a"}));

        let raw = json!({"type": "error", "event": "error", "data": "bad"});
        assert!(matches!(
            ProgressEnvelope::decode(&raw),
            Some(ProgressEnvelope::Error { .. })
        ));
    }

    #[test]
    fn test_progress_envelope_ignores_other_shapes() {
        assert!(ProgressEnvelope::decode(&json!(42)).is_none());
        assert!(ProgressEnvelope::decode(&json!({"type": "percent", "value": 3})).is_none());
        assert!(ProgressEnvelope::decode(&json!({"event": "x"})).is_none());
    }

    #[test]
    fn test_run_requested_wire_shape() {
        let params = DocumentRunParams {
            workspace_id: 1,
            document_uuid: "doc-1".into(),
            commit_uuid: "live".into(),
            project_id: 7,
            user_message: Some("not announced".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(DocumentRunRequested::new(&params)).unwrap();
        assert_eq!(
            json,
            json!({
                "workspaceId": 1,
                "projectId": 7,
                "commitUuid": "live",
                "documentUuid": "doc-1",
                "parameters": {}
            })
        );
    }

    #[test]
    fn test_envelope_from_step_is_stream_event() {
        let value =
            serde_json::to_value(ProgressEnvelope::from(RunEvent::new("chain-step", json!(1))))
                .unwrap();
        assert_eq!(value, json!({"type": "stream_event", "event": "chain-step", "data": 1}));
    }
}
