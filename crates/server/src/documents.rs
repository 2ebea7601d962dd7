//! Resolving a document path within a project to the document's identity.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

/// Looks up documents addressed by `{project, version, path}`.
pub trait DocumentResolver: Send + Sync {
    /// Document uuid for `path`, or `None` if the project has no such document.
    fn resolve(&self, project_id: u64, version_uuid: &str, path: &str) -> Option<String>;
}

/// Documents registered at startup. Every version of a project sees the
/// same documents.
#[derive(Default)]
pub struct InMemoryDocuments {
    documents: RwLock<HashMap<(u64, String), String>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: u64, path: impl Into<String>, document_uuid: impl Into<String>) {
        match self.documents.write() {
            Ok(mut documents) => {
                documents.insert((project_id, normalize(&path.into())), document_uuid.into());
            }
            Err(e) => tracing::error!("RwLock poisoned writing documents: {e}"),
        }
    }

    pub fn with_document(
        self,
        project_id: u64,
        path: impl Into<String>,
        document_uuid: impl Into<String>,
    ) -> Self {
        self.insert(project_id, path, document_uuid);
        self
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentResolver for InMemoryDocuments {
    fn resolve(&self, project_id: u64, _version_uuid: &str, path: &str) -> Option<String> {
        match self.documents.read() {
            Ok(documents) => documents.get(&(project_id, normalize(path))).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading documents: {e}");
                None
            }
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

/// A document registration given on the command line:
/// `PROJECT_ID:PATH=DOCUMENT_UUID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    pub project_id: u64,
    pub path: String,
    pub document_uuid: String,
}

impl FromStr for DocumentEntry {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let usage = || format!("expected PROJECT_ID:PATH=DOCUMENT_UUID, got {raw:?}");
        let (location, document_uuid) = raw.split_once('=').ok_or_else(usage)?;
        let (project_id, path) = location.split_once(':').ok_or_else(usage)?;
        let project_id = project_id.trim().parse().map_err(|_| usage())?;
        if path.trim().is_empty() || document_uuid.trim().is_empty() {
            return Err(usage());
        }
        Ok(Self {
            project_id,
            path: path.to_string(),
            document_uuid: document_uuid.trim().to_string(),
        })
    }
}

impl FromIterator<DocumentEntry> for InMemoryDocuments {
    fn from_iter<I: IntoIterator<Item = DocumentEntry>>(entries: I) -> Self {
        let documents = Self::new();
        for entry in entries {
            documents.insert(entry.project_id, entry.path, entry.document_uuid);
        }
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ignores_surrounding_slashes() {
        let documents = InMemoryDocuments::new().with_document(3, "/prompts/welcome", "doc-1");
        assert_eq!(
            documents.resolve(3, "live", "prompts/welcome").as_deref(),
            Some("doc-1")
        );
        assert_eq!(documents.resolve(4, "live", "prompts/welcome"), None);
        assert_eq!(documents.resolve(3, "live", "prompts/other"), None);
    }

    #[test]
    fn test_parse_entry() {
        let entry: DocumentEntry = "7:onboarding/intro=abc-123".parse().unwrap();
        assert_eq!(
            entry,
            DocumentEntry {
                project_id: 7,
                path: "onboarding/intro".into(),
                document_uuid: "abc-123".into(),
            }
        );
        assert!("onboarding/intro=abc".parse::<DocumentEntry>().is_err());
        assert!("x:path=abc".parse::<DocumentEntry>().is_err());
        assert!("1:path=".parse::<DocumentEntry>().is_err());

        let documents: InMemoryDocuments = vec![entry].into_iter().collect();
        assert_eq!(documents.len(), 1);
    }
}
