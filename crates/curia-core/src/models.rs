//! Core data models for curia.
//!
//! These are the abstract entities the differ, the merge strategies, the
//! curation controller and the suggestion ranker operate on. Storage formats
//! for the underlying documents belong to the [`DocumentStore`] implementation.
//!
//! [`DocumentStore`]: crate::traits::DocumentStore

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults::LABEL_FEATURE;
use crate::error::{Error, Result};

/// Document identifier.
pub type DocumentId = String;

/// Identity under which a set of annotations exists: an annotator username,
/// the curator identity, or a recommender pseudo-owner.
pub type DataOwner = String;

/// Annotation layer identifier.
pub type LayerId = String;

// =============================================================================
// POSITIONS
// =============================================================================

/// Character span without document scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

impl Span {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    /// Loose overlap relation. Zero-width spans overlap a span that contains
    /// their offset.
    pub fn overlaps(&self, other: &Span) -> bool {
        if self.begin == self.end || other.begin == other.end {
            return self.begin <= other.end && other.begin <= self.end;
        }
        self.begin < other.end && other.begin < self.end
    }
}

/// Canonical grouping key used to align annotations across data owners.
///
/// Ordering is the canonical position order: document, begin, end, ordinal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub document_id: DocumentId,
    pub begin: usize,
    pub end: usize,
    /// Sub-position for stacked or linked annotations sharing one span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
}

impl Position {
    pub fn new(document_id: impl Into<DocumentId>, begin: usize, end: usize) -> Self {
        Self {
            document_id: document_id.into(),
            begin,
            end,
            ordinal: None,
        }
    }

    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self
    }

    pub fn span(&self) -> Span {
        Span::new(self.begin, self.end)
    }

    /// Exact-boundary equivalence used by the differ.
    pub fn same_span(&self, other: &Position) -> bool {
        self.document_id == other.document_id && self.begin == other.begin && self.end == other.end
    }

    /// Overlap relation used only by the visibility filter.
    pub fn overlaps(&self, other: &Position) -> bool {
        self.document_id == other.document_id && self.span().overlaps(&other.span())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{})", self.document_id, self.begin, self.end)?;
        if let Some(ordinal) = self.ordinal {
            write!(f, "#{ordinal}")?;
        }
        Ok(())
    }
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// A single annotation contributed by one data owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub position: Position,
    pub layer: LayerId,
    /// Ordered feature name to value map.
    #[serde(default)]
    pub features: BTreeMap<String, JsonValue>,
    /// Index of the next element for chain-type layers, relative to the
    /// containing annotation list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<usize>,
}

impl Annotation {
    /// Span annotation with a label in the default label feature.
    pub fn span(position: Position, layer: impl Into<LayerId>, label: impl Into<String>) -> Self {
        Self::new(position, layer).with_feature(LABEL_FEATURE, JsonValue::String(label.into()))
    }

    /// Annotation without any features.
    pub fn new(position: Position, layer: impl Into<LayerId>) -> Self {
        Self {
            position,
            layer: layer.into(),
            features: BTreeMap::new(),
            next: None,
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn with_next(mut self, next: usize) -> Self {
        self.next = Some(next);
        self
    }

    /// Value of `feature` rendered as a label string.
    pub fn feature_label(&self, feature: &str) -> Option<String> {
        match self.features.get(feature)? {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Primary label (value of [`LABEL_FEATURE`]).
    pub fn label(&self) -> Option<String> {
        self.feature_label(LABEL_FEATURE)
    }
}

/// Lifecycle of a data owner's annotation set for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationSetState {
    #[default]
    New,
    InProgress,
    Finished,
}

/// Curation state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentState {
    #[default]
    New,
    CurationInProgress,
    CurationFinished,
}

/// All annotations one data owner holds for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAnnotationSet {
    pub document_id: DocumentId,
    pub owner: DataOwner,
    #[serde(default)]
    pub state: AnnotationSetState,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Positions whose content was last written by an automatic merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<MergedPosition>,
}

/// Provenance of target content written by a merge decision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MergedPosition {
    pub layer: LayerId,
    pub position: Position,
    /// Configuration the merge wrote.
    pub key: ComparisonKey,
}

impl SourceAnnotationSet {
    pub fn new(document_id: impl Into<DocumentId>, owner: impl Into<DataOwner>) -> Self {
        Self {
            document_id: document_id.into(),
            owner: owner.into(),
            state: AnnotationSetState::New,
            annotations: Vec::new(),
            merged: Vec::new(),
        }
    }

    /// Configuration an automatic merge last wrote at (`layer`, `position`).
    pub fn merged_key(&self, layer: &str, position: &Position) -> Option<&ComparisonKey> {
        self.merged
            .iter()
            .find(|m| m.layer == layer && &m.position == position)
            .map(|m| &m.key)
    }

    /// Record that a merge wrote `key` at (`layer`, `position`).
    pub fn record_merge(&mut self, layer: impl Into<LayerId>, position: Position, key: ComparisonKey) {
        let layer = layer.into();
        self.forget_merge(&layer, &position);
        self.merged.push(MergedPosition { layer, position, key });
        self.merged.sort();
    }

    /// Treat the content at (`layer`, `position`) as a curator's own work.
    pub fn forget_merge(&mut self, layer: &str, position: &Position) {
        self.merged
            .retain(|m| !(m.layer == layer && &m.position == position));
    }

    /// Append an annotation and return its index.
    pub fn push(&mut self, annotation: Annotation) -> usize {
        self.annotations.push(annotation);
        self.annotations.len() - 1
    }

    pub fn with(mut self, annotation: Annotation) -> Self {
        self.push(annotation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// Annotations on `layer` with exactly the span of `position`.
    pub fn at<'a>(
        &'a self,
        layer: &'a str,
        position: &'a Position,
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.annotations
            .iter()
            .filter(move |a| a.layer == layer && a.position.same_span(position))
    }

    /// Remove the annotations at `remove` and append `insert`.
    ///
    /// Links inside `insert` are relative to `insert`; they are rebased onto
    /// the resulting list. Links of kept annotations that pointed at removed
    /// annotations are cut. Returns the indices of the inserted annotations.
    pub fn replace(&mut self, remove: &[usize], insert: Vec<Annotation>) -> Result<Vec<usize>> {
        let removed: BTreeSet<usize> = remove.iter().copied().collect();
        if let Some(&bad) = removed.iter().find(|&&i| i >= self.annotations.len()) {
            return Err(Error::InvalidInput(format!(
                "annotation index {bad} out of range for {} annotations",
                self.annotations.len()
            )));
        }
        if let Some(bad) = insert
            .iter()
            .filter_map(|a| a.next)
            .find(|&n| n >= insert.len())
        {
            return Err(Error::InvalidInput(format!(
                "inserted link {bad} out of range for {} annotations",
                insert.len()
            )));
        }

        let mut remap: Vec<Option<usize>> = Vec::with_capacity(self.annotations.len());
        let mut kept = 0;
        for i in 0..self.annotations.len() {
            if removed.contains(&i) {
                remap.push(None);
            } else {
                remap.push(Some(kept));
                kept += 1;
            }
        }

        let old = std::mem::take(&mut self.annotations);
        for (i, mut annotation) in old.into_iter().enumerate() {
            if remap[i].is_none() {
                continue;
            }
            annotation.next = annotation
                .next
                .and_then(|n| remap.get(n).copied().flatten());
            self.annotations.push(annotation);
        }

        let base = self.annotations.len();
        let mut inserted = Vec::with_capacity(insert.len());
        for mut annotation in insert {
            annotation.next = annotation.next.map(|n| base + n);
            inserted.push(self.push(annotation));
        }
        Ok(inserted)
    }
}

// =============================================================================
// DIFF UNITS
// =============================================================================

/// Canonical comparison key produced by a layer adapter.
///
/// Two units are structurally equal iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComparisonKey(pub Vec<String>);

impl ComparisonKey {
    /// Concatenate several keys into one, in the given order.
    pub fn concat<'a>(keys: impl IntoIterator<Item = &'a ComparisonKey>) -> Self {
        let mut parts = Vec::new();
        for key in keys {
            parts.push(format!("#{}", key.0.len()));
            parts.extend(key.0.iter().cloned());
        }
        ComparisonKey(parts)
    }
}

/// One comparable unit a layer adapter extracts from an annotation set.
///
/// For span layers a unit is a single annotation; for chain layers it is the
/// whole materialized chain anchored at its head.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffUnit {
    pub layer: LayerId,
    pub position: Position,
    pub key: ComparisonKey,
    /// Materialized annotations; `next` links are relative to this list.
    pub annotations: Vec<Annotation>,
    /// Indices of the materialized annotations in the source set.
    pub source_indices: Vec<usize>,
}

// =============================================================================
// SUGGESTIONS
// =============================================================================

/// Non-destructive bitset recording why a suggestion is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisibilityFlags(u8);

impl VisibilityFlags {
    /// Overlaps an already committed annotation.
    pub const OVERLAP: VisibilityFlags = VisibilityFlags(0b001);
    /// Matches a rejected or skipped learning record.
    pub const REJECTED_TRANSIENT: VisibilityFlags = VisibilityFlags(0b010);
    /// Produced by an older recommender generation.
    pub const SUPERSEDED: VisibilityFlags = VisibilityFlags(0b100);
    /// Every hiding reason.
    pub const ALL: VisibilityFlags = VisibilityFlags(0b111);

    pub const fn empty() -> Self {
        VisibilityFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: VisibilityFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: VisibilityFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: VisibilityFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }
}

/// Whether accepting the suggestion happens without user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoAcceptMode {
    #[default]
    Never,
    OnFirstAccess,
}

/// A scored label candidate produced by a recommender run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSuggestion {
    pub id: u64,
    pub recommender_id: String,
    pub generation_id: u64,
    pub document_id: DocumentId,
    pub layer: LayerId,
    pub feature: String,
    /// `None` for document-level metadata suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Target span of relation suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Position>,
    pub label: String,
    pub confidence: f64,
    #[serde(default)]
    pub visibility: VisibilityFlags,
    #[serde(default)]
    pub auto_accept: AutoAcceptMode,
}

impl AnnotationSuggestion {
    pub fn is_visible(&self) -> bool {
        self.visibility.is_empty()
    }

    pub fn hide(&mut self, reason: VisibilityFlags) {
        self.visibility.insert(reason);
    }

    pub fn show(&mut self, reason: VisibilityFlags) {
        self.visibility.remove(reason);
    }

    /// Scope the suggestion competes in for the delta computation.
    pub fn scope(&self) -> SuggestionScope {
        SuggestionScope {
            document_id: self.document_id.clone(),
            position: self.position.clone(),
            secondary: self.secondary.clone(),
            layer: self.layer.clone(),
            feature: self.feature.clone(),
        }
    }

    /// Whether a learning record refers to this candidate.
    pub fn matches_record(&self, record: &LearningRecord) -> bool {
        self.document_id == record.document_id
            && self.layer == record.layer
            && self.feature == record.feature
            && self.label == record.label
            && self.position.as_ref().map(Position::span) == record.span
            && self.secondary.as_ref().map(Position::span) == record.secondary
    }
}

/// Position-or-feature scope of a group of competing suggestions.
///
/// Ordering is the canonical tie-break order of the ranker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuggestionScope {
    pub document_id: DocumentId,
    pub position: Option<Position>,
    pub secondary: Option<Position>,
    pub layer: LayerId,
    pub feature: String,
}

/// Confidence gap between the best and second best label at one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub scope: SuggestionScope,
    pub best: AnnotationSuggestion,
    pub second: Option<AnnotationSuggestion>,
    pub delta: f64,
}

impl Delta {
    pub fn best_label(&self) -> &str {
        &self.best.label
    }

    pub fn second_best_label(&self) -> Option<&str> {
        self.second.as_ref().map(|s| s.label.as_str())
    }
}

// =============================================================================
// LEARNING HISTORY
// =============================================================================

/// Decision a user took on a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserAction {
    Accepted,
    Rejected,
    Skipped,
}

/// Where the decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeLocation {
    #[default]
    MainEditor,
    RecommenderSidebar,
    ActiveLearningSidebar,
    AutoAccept,
}

/// Append-only log entry of a user decision on a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub user: String,
    pub document_id: DocumentId,
    pub layer: LayerId,
    pub feature: String,
    pub label: String,
    /// `None` for document-level metadata suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Span>,
    pub action: UserAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub change_location: ChangeLocation,
}

impl LearningRecord {
    /// Record a decision on `suggestion` by `user` at `timestamp`.
    pub fn for_suggestion(
        suggestion: &AnnotationSuggestion,
        user: impl Into<String>,
        action: UserAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user: user.into(),
            document_id: suggestion.document_id.clone(),
            layer: suggestion.layer.clone(),
            feature: suggestion.feature.clone(),
            label: suggestion.label.clone(),
            span: suggestion.position.as_ref().map(Position::span),
            secondary: suggestion.secondary.as_ref().map(Position::span),
            action,
            timestamp,
            change_location: ChangeLocation::ActiveLearningSidebar,
        }
    }

    pub fn with_change_location(mut self, location: ChangeLocation) -> Self {
        self.change_location = location;
        self
    }
}

// =============================================================================
// CURATION OUTCOMES
// =============================================================================

/// Result class of curating one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationStatus {
    /// Re-diff confirmed every position is curated.
    Finished,
    /// At least one position needs manual curation.
    Contested,
    /// The document could not be curated (I/O or structural error).
    Failed,
}

/// Per-document result reported by the curation controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationOutcome {
    pub document_id: DocumentId,
    pub status: CurationStatus,
    /// Configuration sets seen by the first diff.
    pub positions: usize,
    /// Merge decisions written into the target set.
    pub applied: usize,
    /// Positions left without a decision.
    pub contested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CurationOutcome {
    pub fn failed(document_id: impl Into<DocumentId>, error: impl fmt::Display) -> Self {
        Self {
            document_id: document_id.into(),
            status: CurationStatus::Failed,
            positions: 0,
            applied: 0,
            contested: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == CurationStatus::Finished
    }
}

/// Severity of a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}
