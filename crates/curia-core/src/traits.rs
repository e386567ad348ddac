//! Core traits for curia's external collaborators.
//!
//! These traits define the ports concrete backends must satisfy: the document
//! store, recommenders, the learning history, progress sinks and per-layer
//! comparison adapters. Implementations live outside the core; `curia-db`
//! ships in-memory ones.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Persistent storage for per-owner annotation sets and document states.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the annotation set `owner` holds for `document`.
    ///
    /// Returns `Ok(None)` if the owner has no set for the document yet.
    async fn load_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
    ) -> Result<Option<SourceAnnotationSet>>;

    /// Replace the annotation set `owner` holds for `document`.
    async fn write_source_annotation_set(
        &self,
        document: &str,
        owner: &str,
        set: &SourceAnnotationSet,
    ) -> Result<()>;

    /// Data owners whose annotations take part in curation of `document`.
    async fn list_curatable_data_owners(&self, document: &str) -> Result<Vec<DataOwner>>;

    /// Update the curation state of `document`.
    async fn set_document_state(&self, document: &str, state: DocumentState) -> Result<()>;

    /// Update the state of the annotation set `owner` holds for `document`.
    async fn set_annotation_set_state(
        &self,
        document: &str,
        owner: &str,
        state: AnnotationSetState,
    ) -> Result<()>;
}

// =============================================================================
// RECOMMENDERS AND LEARNING HISTORY
// =============================================================================

/// Source of machine-generated suggestions.
#[async_trait]
pub trait RecommenderPort: Send + Sync {
    /// Identifier of the recommender.
    fn recommender_id(&self) -> &str;

    /// Candidate suggestions for `document` on `layer`.
    ///
    /// Output may still contain older generations; the ranker flags them as
    /// superseded.
    async fn get_candidate_suggestions(
        &self,
        document: &str,
        layer: &str,
    ) -> Result<Vec<AnnotationSuggestion>>;
}

/// Append-only log of user decisions on suggestions.
#[async_trait]
pub trait LearningHistoryPort: Send + Sync {
    /// Append a decision. Records are never updated.
    async fn append_record(&self, record: LearningRecord) -> Result<()>;

    /// Records `user` produced on `layer` of `document`.
    async fn list_records_for_document_user_layer(
        &self,
        document: &str,
        user: &str,
        layer: &str,
    ) -> Result<Vec<LearningRecord>>;
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Receiver of per-document progress and log messages.
pub trait ProgressSink: Send + Sync {
    /// Called once per document after its state has been updated.
    fn on_document_processed(&self, document: &str, outcome: &CurationOutcome);

    /// Free-form progress or failure message.
    fn on_message(&self, level: LogLevel, text: &str);
}

// =============================================================================
// LAYER ADAPTERS
// =============================================================================

/// Per-layer comparison policy used by the differ and the visibility filter.
pub trait LayerAdapter: Send + Sync {
    /// Layer this adapter handles.
    fn layer(&self) -> &str;

    /// Whether at most one annotation may exist at a position on this layer.
    ///
    /// Suggestions overlapping a committed annotation on a singleton layer are
    /// hidden; on stacking layers only suggestions repeating a committed label
    /// are hidden.
    fn is_singleton(&self) -> bool;

    /// Extract the comparable units of this layer from `set`.
    ///
    /// Fails with [`crate::Error::StructuralMismatch`] when an annotation
    /// cannot be compared under this layer's rules.
    fn units(&self, set: &SourceAnnotationSet) -> Result<Vec<DiffUnit>>;
}
