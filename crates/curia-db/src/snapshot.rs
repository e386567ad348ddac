//! JSON project snapshots.
//!
//! A snapshot captures everything curation and ranking need for one project:
//! per-document annotation sets of every owner, recommender output and the
//! learning history. The in-memory backends are seeded from it and the
//! curated result is written back into it.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use curia_core::{
    AnnotationSuggestion, DocumentId, DocumentState, Error, LearningRecord, Result,
    SourceAnnotationSet,
};

/// One document with the annotation sets of all its owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    #[serde(default)]
    pub state: DocumentState,
    #[serde(default)]
    pub annotation_sets: Vec<SourceAnnotationSet>,
}

/// Serializable state of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: String,
    #[serde(default)]
    pub documents: Vec<DocumentSnapshot>,
    #[serde(default)]
    pub suggestions: Vec<AnnotationSuggestion>,
    #[serde(default)]
    pub learning_records: Vec<LearningRecord>,
}

impl ProjectSnapshot {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            documents: Vec::new(),
            suggestions: Vec::new(),
            learning_records: Vec::new(),
        }
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.iter().map(|d| d.document_id.clone()).collect()
    }

    /// Check that sets belong to their document and owners are unique.
    pub fn validate(&self) -> Result<()> {
        let mut documents = BTreeSet::new();
        for document in &self.documents {
            if !documents.insert(document.document_id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "document {} appears twice",
                    document.document_id
                )));
            }
            let mut owners = BTreeSet::new();
            for set in &document.annotation_sets {
                if set.document_id != document.document_id {
                    return Err(Error::InvalidInput(format!(
                        "set of {} for document {} is filed under {}",
                        set.owner, set.document_id, document.document_id
                    )));
                }
                if !owners.insert(set.owner.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "owner {} has two sets for document {}",
                        set.owner, document.document_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: ProjectSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let snapshot = Self::from_json(&json)?;
        info!(
            subsystem = "db",
            project = %snapshot.project,
            documents = snapshot.documents.len(),
            suggestions = snapshot.suggestions.len(),
            path = %path.display(),
            "Project snapshot loaded"
        );
        Ok(snapshot)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_json()?).await?;
        info!(
            subsystem = "db",
            project = %self.project,
            path = %path.display(),
            "Project snapshot saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curia_core::{Annotation, Position};

    fn snapshot() -> ProjectSnapshot {
        let mut snapshot = ProjectSnapshot::new("demo");
        snapshot.documents.push(DocumentSnapshot {
            document_id: "doc".into(),
            state: DocumentState::New,
            annotation_sets: vec![SourceAnnotationSet::new("doc", "alice").with(
                Annotation::span(Position::new("doc", 0, 5), "ner", "PER"),
            )],
        });
        snapshot
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let snapshot = ProjectSnapshot::from_json(
            r#"{"project": "p", "documents": [{"document_id": "d"}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.documents[0].state, DocumentState::New);
        assert!(snapshot.suggestions.is_empty());
    }

    #[test]
    fn test_misfiled_set_is_rejected() {
        let mut bad = snapshot();
        bad.documents[0].annotation_sets[0].document_id = "other".into();
        assert!(matches!(bad.validate(), Err(Error::InvalidInput(_))));

        let mut dup = snapshot();
        let set = dup.documents[0].annotation_sets[0].clone();
        dup.documents[0].annotation_sets.push(set);
        assert!(dup.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        snapshot().save(&path).await.unwrap();
        assert_eq!(ProjectSnapshot::load(&path).await.unwrap(), snapshot());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let err = ProjectSnapshot::load("/nonexistent/curia/project.json")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
