//! Bodies of the non-streaming run endpoint.

use docrun_core::RunOutcome;
use docrun_types::{ChainStepResponse, ToolCall};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::version::ResponseShape;

/// Body for SDKs below the version threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRunBody {
    pub response: ChainStepResponse,
    pub tool_calls: Vec<ToolCall>,
}

/// Body for current SDKs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunBody {
    pub response: ChainStepResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunResponseBody {
    Legacy(LegacyRunBody),
    Current(RunBody),
}

/// Shape a completed run for the caller. A completed run without a final
/// response is an internal fault.
pub fn present(outcome: RunOutcome, shape: ResponseShape) -> ApiResult<RunResponseBody> {
    let response = outcome
        .response
        .ok_or_else(|| ApiError::Internal("Run completed without a response".into()))?;

    Ok(match shape {
        ResponseShape::Legacy => RunResponseBody::Legacy(LegacyRunBody {
            response,
            tool_calls: outcome.tool_calls,
        }),
        ResponseShape::Current => RunResponseBody::Current(RunBody { response }),
    })
}
