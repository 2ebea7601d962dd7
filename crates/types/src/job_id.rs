//! Correlation identity for document run jobs.
//!
//! The identity is built by the submitter before anything is enqueued and is
//! the only key used on the lifecycle bus and the cancellation bus.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of commit uuid characters kept in the identity.
const COMMIT_PREFIX_LEN: usize = 7;

/// Last submission timestamp handed out by [`JobId::generate`].
static LAST_SUBMISSION_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Identity of one submitted document run.
///
/// Format: `workspace:{id}:commit:{commit[..7]}:document:{uuid}:{millis}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Build the identity for a submission made at `submitted_at`.
    pub fn new(
        workspace_id: u64,
        commit_uuid: &str,
        document_uuid: &str,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self::from_parts(
            workspace_id,
            commit_uuid,
            document_uuid,
            submitted_at.timestamp_millis(),
        )
    }

    /// Build the identity for a submission happening now.
    ///
    /// Submission times come from a process-wide monotonic millisecond clock,
    /// so two calls never produce the same identity even within one
    /// millisecond.
    pub fn generate(workspace_id: u64, commit_uuid: &str, document_uuid: &str) -> Self {
        let millis = next_submission_millis(Utc::now().timestamp_millis());
        Self::from_parts(workspace_id, commit_uuid, document_uuid, millis)
    }

    fn from_parts(workspace_id: u64, commit_uuid: &str, document_uuid: &str, millis: i64) -> Self {
        let commit: String = commit_uuid.chars().take(COMMIT_PREFIX_LEN).collect();
        Self(format!(
            "workspace:{workspace_id}:commit:{commit}:document:{document_uuid}:{millis}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn next_submission_millis(now: i64) -> i64 {
    let mut last = LAST_SUBMISSION_MILLIS.load(Ordering::Acquire);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_SUBMISSION_MILLIS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
