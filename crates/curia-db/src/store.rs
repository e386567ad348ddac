//! In-memory document store.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use curia_core::defaults::{CURATION_USER, RECOMMENDER_OWNER_PREFIX};
use curia_core::{
    AnnotationSetState, DataOwner, DocumentId, DocumentState, DocumentStore, Error, Result,
    SourceAnnotationSet,
};

use crate::snapshot::{DocumentSnapshot, ProjectSnapshot};

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<DocumentId, DocumentState>,
    /// Annotation sets per document, then per owner.
    sets: BTreeMap<DocumentId, BTreeMap<DataOwner, SourceAnnotationSet>>,
    excluded: BTreeSet<DataOwner>,
    writes: usize,
}

impl StoreState {
    fn set(&self, document: &str, owner: &str) -> Option<&SourceAnnotationSet> {
        self.sets.get(document)?.get(owner)
    }

    fn document_sets(&self, document: &str) -> impl Iterator<Item = &SourceAnnotationSet> {
        self.sets.get(document).into_iter().flat_map(|owners| owners.values())
    }

    fn put(&mut self, set: SourceAnnotationSet) {
        self.sets
            .entry(set.document_id.clone())
            .or_default()
            .insert(set.owner.clone(), set);
    }
}

/// [`DocumentStore`] keeping every annotation set in memory.
///
/// The curator identity and recommender pseudo-owners are never curatable.
/// Further owners can be excluded with [`MemoryDocumentStore::with_excluded_owner`].
#[derive(Debug)]
pub struct MemoryDocumentStore {
    state: RwLock<StoreState>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        let mut state = StoreState::default();
        state.excluded.insert(CURATION_USER.to_string());
        Self {
            state: RwLock::new(state),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the documents of a snapshot.
    pub fn from_snapshot(snapshot: &ProjectSnapshot) -> Self {
        let mut store = Self::default();
        let state = store.state.get_mut();
        for document in &snapshot.documents {
            state
                .documents
                .insert(document.document_id.clone(), document.state);
            for set in &document.annotation_sets {
                state.put(set.clone());
            }
        }
        store
    }

    /// Never offer `owner` for curation.
    pub fn with_excluded_owner(mut self, owner: impl Into<DataOwner>) -> Self {
        self.state.get_mut().excluded.insert(owner.into());
        self
    }

    /// Register a document without any annotation sets.
    pub async fn add_document(&self, document: impl Into<DocumentId>) {
        self.state
            .write()
            .await
            .documents
            .entry(document.into())
            .or_default();
    }

    /// Store `set`, registering its document if needed.
    pub async fn insert_set(&self, set: SourceAnnotationSet) {
        let mut state = self.state.write().await;
        state.documents.entry(set.document_id.clone()).or_default();
        state.put(set);
    }

    pub async fn document_ids(&self) -> Vec<DocumentId> {
        self.state.read().await.documents.keys().cloned().collect()
    }

    pub async fn document_state(&self, document: &str) -> Option<DocumentState> {
        self.state.read().await.documents.get(document).copied()
    }

    pub async fn annotation_set(&self, document: &str, owner: &str) -> Option<SourceAnnotationSet> {
        self.state.read().await.set(document, owner).cloned()
    }

    /// Number of successful writes of annotation sets.
    pub async fn write_count(&self) -> usize {
        self.state.read().await.writes
    }

    /// Current contents as snapshot documents.
    pub async fn export_documents(&self) -> Vec<DocumentSnapshot> {
        let state = self.state.read().await;
        state
            .documents
            .iter()
            .map(|(document_id, document_state)| DocumentSnapshot {
                document_id: document_id.clone(),
                state: *document_state,
                annotation_sets: state.document_sets(document_id).cloned().collect(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
    ) -> Result<Option<SourceAnnotationSet>> {
        let state = self.state.read().await;
        if !state.documents.contains_key(document) {
            return Err(Error::NotFound(format!("document {document}")));
        }
        Ok(state.set(document, owner).cloned())
    }

    async fn write_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
        set: &SourceAnnotationSet,
    ) -> Result<()> {
        if set.document_id != document || set.owner != owner {
            return Err(Error::InvalidInput(format!(
                "set of {}/{} written as {document}/{owner}",
                set.document_id, set.owner
            )));
        }
        let mut state = self.state.write().await;
        if !state.documents.contains_key(document) {
            return Err(Error::NotFound(format!("document {document}")));
        }
        state.put(set.clone());
        state.writes += 1;
        debug!(
            subsystem = "db",
            document_id = %document,
            data_owner = %owner,
            annotations = set.len(),
            "Annotation set written"
        );
        Ok(())
    }

    async fn list_curatable_data_owners(&self, document: &str) -> Result<Vec<DataOwner>> {
        let state = self.state.read().await;
        if !state.documents.contains_key(document) {
            return Err(Error::NotFound(format!("document {document}")));
        }
        Ok(state
            .document_sets(document)
            .map(|set| &set.owner)
            .filter(|owner| {
                !state.excluded.contains(*owner) && !owner.starts_with(RECOMMENDER_OWNER_PREFIX)
            })
            .cloned()
            .collect())
    }

    async fn set_document_state(&self, document: &str, new_state: DocumentState) -> Result<()> {
        let mut state = self.state.write().await;
        let current = state
            .documents
            .get_mut(document)
            .ok_or_else(|| Error::NotFound(format!("document {document}")))?;
        trace!(document_id = %document, from = ?current, to = ?new_state, "Document state");
        *current = new_state;
        Ok(())
    }

    async fn set_annotation_set_state(
        &self,
        document: &str,
        owner: &str,
        new_state: AnnotationSetState,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(document) {
            return Err(Error::NotFound(format!("document {document}")));
        }
        state
            .sets
            .entry(document.to_string())
            .or_default()
            .entry(owner.to_string())
            .or_insert_with(|| SourceAnnotationSet::new(document, owner))
            .state = new_state;
        Ok(())
    }
}
