//! Document store wrapper injecting storage failures.
//!
//! Used to exercise per-document failure isolation of the curation
//! controller without a real backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use curia_core::{
    AnnotationSetState, DataOwner, DocumentState, DocumentStore, Error, Result,
    SourceAnnotationSet,
};

/// Delegates to an inner store, failing selected documents.
pub struct FailingDocumentStore {
    inner: Arc<dyn DocumentStore>,
    fail_loads: BTreeSet<String>,
    fail_writes: BTreeSet<String>,
}

impl FailingDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            fail_loads: BTreeSet::new(),
            fail_writes: BTreeSet::new(),
        }
    }

    /// Loading any set of `document` fails.
    pub fn fail_loads_for(mut self, document: impl Into<String>) -> Self {
        self.fail_loads.insert(document.into());
        self
    }

    /// Writing any set of `document` fails.
    pub fn fail_writes_for(mut self, document: impl Into<String>) -> Self {
        self.fail_writes.insert(document.into());
        self
    }
}

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn load_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
    ) -> Result<Option<SourceAnnotationSet>> {
        if self.fail_loads.contains(document) {
            return Err(Error::Store(format!("injected read failure for {document}/{owner}")));
        }
        self.inner.load_source_annotation_set(document, owner).await
    }

    async fn write_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
        set: &SourceAnnotationSet,
    ) -> Result<()> {
        if self.fail_writes.contains(document) {
            return Err(Error::Store(format!("injected write failure for {document}/{owner}")));
        }
        self.inner
            .write_source_annotation_set(document, owner, set)
            .await
    }

    async fn list_curatable_data_owners(&self, document: &str) -> Result<Vec<DataOwner>> {
        self.inner.list_curatable_data_owners(document).await
    }

    async fn set_document_state(&self, document: &str, state: DocumentState) -> Result<()> {
        self.inner.set_document_state(document, state).await
    }

    async fn set_annotation_set_state(
        &self,
        document: &str,
        owner: &str,
        state: AnnotationSetState,
    ) -> Result<()> {
        self.inner
            .set_annotation_set_state(document, owner, state)
            .await
    }
}
