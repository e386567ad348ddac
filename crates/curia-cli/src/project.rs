//! Project files: a JSON snapshot plus the layer and merge configuration
//! needed to curate it.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use curia_core::{Annotation, LayerAdapter};
use curia_db::{MemoryDocumentStore, ProjectSnapshot};
use curia_diff::{build_adapters, LayerDefinition, MergeStrategy};

/// On-disk project description.
///
/// ```json
/// {
///   "project": "news",
///   "layers": [{ "kind": "span", "layer": "ner" }],
///   "strategy": { "kind": "threshold", "min_votes": 2 },
///   "documents": [...]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(flatten)]
    pub snapshot: ProjectSnapshot,
    #[serde(default)]
    pub layers: Vec<LayerDefinition>,
    #[serde(default)]
    pub strategy: MergeStrategy,
}

impl ProjectFile {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let file: ProjectFile = serde_json::from_str(json).context("invalid project file")?;
        file.snapshot.validate()?;
        file.strategy.validate()?;
        Ok(file)
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("failed to load {}", path.display()))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn adapters(&self) -> anyhow::Result<Vec<Arc<dyn LayerAdapter>>> {
        Ok(build_adapters(self.layers.clone())?)
    }

    /// In-memory store seeded with every document of the project.
    pub fn store(&self) -> MemoryDocumentStore {
        MemoryDocumentStore::from_snapshot(&self.snapshot)
    }

    /// Replace the documents with the current content of `store`.
    pub async fn absorb(&mut self, store: &MemoryDocumentStore) {
        self.snapshot.documents = store.export_documents().await;
    }

    /// Annotations `owner` already committed on `layer` of `document`.
    pub fn committed(&self, document: &str, owner: &str, layer: &str) -> Vec<Annotation> {
        self.snapshot
            .documents
            .iter()
            .filter(|d| d.document_id == document)
            .flat_map(|d| d.annotation_sets.iter())
            .filter(|set| set.owner == owner)
            .flat_map(|set| set.annotations.iter())
            .filter(|a| a.layer == layer)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"{
        "project": "news",
        "layers": [{ "kind": "span", "layer": "ner" }],
        "strategy": { "kind": "unanimous", "min_votes": 2 },
        "documents": [{
            "document_id": "doc-1",
            "annotation_sets": [{
                "document_id": "doc-1",
                "owner": "alice",
                "annotations": [{
                    "position": { "document_id": "doc-1", "begin": 0, "end": 5 },
                    "layer": "ner",
                    "features": { "value": "PER" }
                }]
            }]
        }]
    }"#;

    #[test]
    fn test_parse_project_file() {
        let file = ProjectFile::from_json(PROJECT).unwrap();
        assert_eq!(file.snapshot.project, "news");
        assert_eq!(file.snapshot.document_ids(), vec!["doc-1".to_string()]);
        assert_eq!(file.strategy, MergeStrategy::Unanimous { min_votes: 2 });
        assert_eq!(file.adapters().unwrap().len(), 1);
        assert_eq!(file.committed("doc-1", "alice", "ner").len(), 1);
        assert!(file.committed("doc-1", "bob", "ner").is_empty());
    }

    #[test]
    fn test_strategy_defaults_to_threshold() {
        let file = ProjectFile::from_json(r#"{ "project": "empty" }"#).unwrap();
        assert_eq!(file.strategy, MergeStrategy::default());
        assert!(file.adapters().is_err());
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let json = r#"{ "project": "p", "strategy": { "kind": "threshold", "min_votes": 0 } }"#;
        assert!(ProjectFile::from_json(json).is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let file = ProjectFile::from_json(PROJECT).unwrap();
        file.save(&path).await.unwrap();

        let reloaded = ProjectFile::load(&path).await.unwrap();
        assert_eq!(reloaded.snapshot, file.snapshot);
        assert_eq!(reloaded.strategy, file.strategy);
    }
}
