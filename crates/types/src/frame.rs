//! Outward push-stream frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Event name of the synthetic frame sent as soon as a job is accepted.
pub const JOB_QUEUED_EVENT: &str = "job_queued";

/// Event name of the frame that reports a failed run.
pub const ERROR_EVENT: &str = "error";

/// One frame of the outward stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
pub struct StreamFrame {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl StreamFrame {
    /// Build a frame. Textual payloads pass through untouched, anything else
    /// is serialized as JSON.
    pub fn new(id: u64, event: impl Into<String>, data: &Value) -> Self {
        let data = match data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self {
            id: id.to_string(),
            event: event.into(),
            data,
        }
    }

    /// Error frame with a `{"error": message}` body.
    pub fn error(id: u64, message: &str) -> Self {
        Self::new(id, ERROR_EVENT, &serde_json::json!({ "error": message }))
    }

    pub fn is_error(&self) -> bool {
        self.event == ERROR_EVENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_payload_passes_through() {
        let frame = StreamFrame::new(3, "text-delta", &json!("hello \"world\""));
        assert_eq!(frame.id, "3");
        assert_eq!(frame.data, "hello \"world\"");
    }

    #[test]
    fn test_structured_payload_is_serialized() {
        let frame = StreamFrame::new(0, JOB_QUEUED_EVENT, &json!({"jobId": "j"}));
        assert_eq!(frame.data, r#"{"jobId":"j"}"#);
        assert!(!frame.is_error());
    }

    #[test]
    fn test_error_frame_body() {
        let frame = StreamFrame::error(7, "provider down");
        assert!(frame.is_error());
        let body: Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(body, json!({"error": "provider down"}));
    }
}
