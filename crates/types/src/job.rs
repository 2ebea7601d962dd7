//! Document run job payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::JobId;

/// Queue job name used for API-triggered document runs.
pub const RUN_DOCUMENT_API_JOB: &str = "runDocumentApiJob";

/// Where a run was triggered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    #[default]
    Api,
    Playground,
    Evaluation,
    Experiment,
    SharedPrompt,
    EmailTrigger,
    ScheduledTrigger,
}

/// Parameters a caller supplies to start a document run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRunParams {
    pub workspace_id: u64,
    pub document_uuid: String,
    pub commit_uuid: String,
    pub project_id: u64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default)]
    pub source: LogSource,
}

/// Payload stored in the work queue for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDocumentJobData {
    pub workspace_id: u64,
    pub document_uuid: String,
    pub commit_uuid: String,
    pub project_id: u64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default)]
    pub source: LogSource,
    pub job_id: JobId,
}

impl RunDocumentJobData {
    pub fn new(params: DocumentRunParams, job_id: JobId) -> Self {
        Self {
            workspace_id: params.workspace_id,
            document_uuid: params.document_uuid,
            commit_uuid: params.commit_uuid,
            project_id: params.project_id,
            parameters: params.parameters,
            custom_identifier: params.custom_identifier,
            tools: params.tools,
            user_message: params.user_message,
            source: params.source,
            job_id,
        }
    }
}
