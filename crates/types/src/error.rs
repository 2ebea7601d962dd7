use thiserror::Error;

/// Message carried by runs stopped through the cancellation bus.
pub const ABORT_MESSAGE: &str = "Job aborted by client";

/// Terminal failure of a document run, as seen by the submitter and the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("{0}")]
    Failed(String),

    #[error("{}", ABORT_MESSAGE)]
    Aborted,

    #[error("Malformed job result: {0}")]
    MalformedResult(String),
}

impl RunError {
    /// Error built from a `failed` lifecycle event.
    pub fn from_reason(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Whether the run ended because a client asked for it.
    ///
    /// Aborts cross the queue as plain failure reasons, so the message is the
    /// only thing left to look at on the submitter side.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::Failed(reason) => reason.contains(ABORT_MESSAGE),
            Self::MalformedResult(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_error_display() {
        assert_eq!(RunError::from_reason("boom").to_string(), "boom");
        assert_eq!(RunError::Aborted.to_string(), ABORT_MESSAGE);
        assert!(RunError::MalformedResult("eof".into())
            .to_string()
            .contains("eof"));
    }

    #[test]
    fn test_abort_survives_the_queue() {
        let reason = RunError::Aborted.to_string();
        assert!(RunError::from_reason(reason).is_abort());
        assert!(!RunError::from_reason("provider timeout").is_abort());
    }
}
