//! Suggestion visibility filter.
//!
//! Each pass recomputes exactly one [`VisibilityFlags`] bit from its inputs
//! and never deletes a suggestion, so reapplying any pass to its own output
//! leaves every flag unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use curia_core::{
    Annotation, AnnotationSuggestion, LayerAdapter, LearningRecord, UserAction, VisibilityFlags,
};

/// Per-layer stacking policy for the overlap pass.
#[derive(Debug, Clone, Default)]
pub struct VisibilityFilter {
    singleton: HashMap<String, bool>,
}

impl VisibilityFilter {
    /// Filter treating every layer as stacking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the singleton policy from layer adapters.
    pub fn from_adapters(adapters: &[Arc<dyn LayerAdapter>]) -> Self {
        Self {
            singleton: adapters
                .iter()
                .map(|a| (a.layer().to_string(), a.is_singleton()))
                .collect(),
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>, singleton: bool) -> Self {
        self.singleton.insert(layer.into(), singleton);
        self
    }

    /// Unknown layers allow stacking.
    pub fn is_singleton(&self, layer: &str) -> bool {
        self.singleton.get(layer).copied().unwrap_or(false)
    }

    /// Recompute [`VisibilityFlags::OVERLAP`] against committed annotations.
    ///
    /// On singleton layers a suggestion overlapping any committed annotation
    /// is hidden. On stacking layers only a suggestion whose label equals a
    /// committed label at the same span is hidden.
    pub fn hide_overlapping(&self, committed: &[Annotation], suggestions: &mut [AnnotationSuggestion]) {
        let mut by_layer: HashMap<(&str, &str), Vec<&Annotation>> = HashMap::new();
        for annotation in committed {
            by_layer
                .entry((annotation.position.document_id.as_str(), annotation.layer.as_str()))
                .or_default()
                .push(annotation);
        }

        for suggestion in suggestions.iter_mut() {
            let candidates = by_layer
                .get(&(suggestion.document_id.as_str(), suggestion.layer.as_str()))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let singleton = self.is_singleton(&suggestion.layer);
            let hidden = candidates.iter().any(|annotation| {
                let colocated = match &suggestion.position {
                    Some(position) if singleton => position.overlaps(&annotation.position),
                    Some(position) => position.same_span(&annotation.position),
                    None => true,
                };
                colocated
                    && (singleton
                        || annotation.feature_label(&suggestion.feature).as_deref()
                            == Some(suggestion.label.as_str()))
            });
            if hidden {
                suggestion.hide(VisibilityFlags::OVERLAP);
            } else {
                suggestion.show(VisibilityFlags::OVERLAP);
            }
        }
    }
}

/// Whether a learning record suppresses the suggestion it refers to.
///
/// Rejections always apply. A skip applies when there is no cutoff, or when
/// the cutoff is at or before the skip (`cutoff <= record.timestamp`); skips
/// strictly before the cutoff are stale.
pub fn is_record_honored(record: &LearningRecord, skip_cutoff: Option<DateTime<Utc>>) -> bool {
    match record.action {
        UserAction::Rejected => true,
        UserAction::Skipped => skip_cutoff.map_or(true, |cutoff| cutoff <= record.timestamp),
        UserAction::Accepted => false,
    }
}

/// Recompute [`VisibilityFlags::REJECTED_TRANSIENT`] from the learning history.
pub fn hide_rejected(
    records: &[LearningRecord],
    skip_cutoff: Option<DateTime<Utc>>,
    suggestions: &mut [AnnotationSuggestion],
) {
    let honored: Vec<&LearningRecord> = records
        .iter()
        .filter(|r| is_record_honored(r, skip_cutoff))
        .collect();
    for suggestion in suggestions.iter_mut() {
        if honored.iter().any(|r| suggestion.matches_record(r)) {
            suggestion.hide(VisibilityFlags::REJECTED_TRANSIENT);
        } else {
            suggestion.show(VisibilityFlags::REJECTED_TRANSIENT);
        }
    }
}

/// Recompute [`VisibilityFlags::SUPERSEDED`]: only the newest generation of
/// each recommender stays visible.
pub fn hide_superseded(suggestions: &mut [AnnotationSuggestion]) {
    let mut latest: HashMap<&str, u64> = HashMap::new();
    for suggestion in suggestions.iter() {
        let entry = latest.entry(suggestion.recommender_id.as_str()).or_insert(0);
        *entry = (*entry).max(suggestion.generation_id);
    }
    let latest: HashMap<String, u64> = latest
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    for suggestion in suggestions.iter_mut() {
        if latest.get(&suggestion.recommender_id) == Some(&suggestion.generation_id) {
            suggestion.show(VisibilityFlags::SUPERSEDED);
        } else {
            suggestion.hide(VisibilityFlags::SUPERSEDED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use curia_core::{AutoAcceptMode, Position};

    fn suggestion(id: u64, layer: &str, begin: usize, end: usize, label: &str) -> AnnotationSuggestion {
        AnnotationSuggestion {
            id,
            recommender_id: "rec".into(),
            generation_id: 1,
            document_id: "doc".into(),
            layer: layer.into(),
            feature: "value".into(),
            position: Some(Position::new("doc", begin, end)),
            secondary: None,
            label: label.into(),
            confidence: 0.5,
            visibility: VisibilityFlags::empty(),
            auto_accept: AutoAcceptMode::Never,
        }
    }

    fn flags(suggestions: &[AnnotationSuggestion]) -> Vec<VisibilityFlags> {
        suggestions.iter().map(|s| s.visibility).collect()
    }

    #[test]
    fn test_singleton_layer_hides_any_overlap() {
        let filter = VisibilityFilter::new().with_layer("pos", true);
        let committed = vec![Annotation::span(Position::new("doc", 0, 5), "pos", "NN")];
        let mut suggestions = vec![
            suggestion(1, "pos", 3, 8, "VB"),
            suggestion(2, "pos", 5, 8, "VB"),
        ];
        filter.hide_overlapping(&committed, &mut suggestions);
        assert!(!suggestions[0].is_visible());
        assert!(suggestions[1].is_visible());
    }

    #[test]
    fn test_stacking_layer_hides_only_same_label() {
        let filter = VisibilityFilter::new().with_layer("ner", false);
        let committed = vec![Annotation::span(Position::new("doc", 0, 5), "ner", "PER")];
        let mut suggestions = vec![
            suggestion(1, "ner", 0, 5, "PER"),
            suggestion(2, "ner", 0, 5, "ORG"),
            suggestion(3, "ner", 1, 5, "PER"),
        ];
        filter.hide_overlapping(&committed, &mut suggestions);
        assert!(!suggestions[0].is_visible());
        assert!(suggestions[1].is_visible());
        assert!(suggestions[2].is_visible());
    }

    #[test]
    fn test_overlap_ignores_other_documents_and_layers() {
        let filter = VisibilityFilter::new().with_layer("pos", true);
        let committed = vec![
            Annotation::span(Position::new("other", 0, 5), "pos", "NN"),
            Annotation::span(Position::new("doc", 0, 5), "ner", "PER"),
        ];
        let mut suggestions = vec![suggestion(1, "pos", 0, 5, "NN")];
        filter.hide_overlapping(&committed, &mut suggestions);
        assert!(suggestions[0].is_visible());
    }

    #[test]
    fn test_overlap_flag_is_cleared_when_annotation_disappears() {
        let filter = VisibilityFilter::new().with_layer("pos", true);
        let mut suggestions = vec![suggestion(1, "pos", 0, 5, "NN")];
        let committed = vec![Annotation::span(Position::new("doc", 0, 5), "pos", "NN")];
        filter.hide_overlapping(&committed, &mut suggestions);
        assert!(!suggestions[0].is_visible());
        filter.hide_overlapping(&[], &mut suggestions);
        assert!(suggestions[0].is_visible());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = VisibilityFilter::new().with_layer("pos", true);
        let committed = vec![
            Annotation::span(Position::new("doc", 0, 5), "pos", "NN"),
            Annotation::span(Position::new("doc", 6, 9), "ner", "PER"),
        ];
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut suggestions = vec![
            suggestion(1, "pos", 0, 5, "NN"),
            suggestion(2, "ner", 6, 9, "PER"),
            suggestion(3, "ner", 6, 9, "ORG"),
        ];
        let records = vec![LearningRecord::for_suggestion(
            &suggestions[2],
            "alice",
            UserAction::Skipped,
            ts,
        )];

        filter.hide_overlapping(&committed, &mut suggestions);
        hide_rejected(&records, None, &mut suggestions);
        hide_superseded(&mut suggestions);
        let once = flags(&suggestions);

        filter.hide_overlapping(&committed, &mut suggestions);
        hide_rejected(&records, None, &mut suggestions);
        hide_superseded(&mut suggestions);
        assert_eq!(flags(&suggestions), once);
    }

    #[test]
    fn test_skip_cutoff_boundary() {
        let cutoff = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let at = |ts| {
            let s = suggestion(1, "ner", 0, 5, "PER");
            LearningRecord::for_suggestion(&s, "alice", UserAction::Skipped, ts)
        };
        assert!(!is_record_honored(&at(cutoff - Duration::seconds(1)), Some(cutoff)));
        assert!(is_record_honored(&at(cutoff), Some(cutoff)));
        assert!(is_record_honored(&at(cutoff + Duration::seconds(1)), Some(cutoff)));
        assert!(is_record_honored(&at(cutoff - Duration::days(365)), None));
    }

    #[test]
    fn test_rejection_ignores_cutoff_and_acceptance_never_hides() {
        let cutoff = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let s = suggestion(1, "ner", 0, 5, "PER");
        let early = cutoff - Duration::days(1);
        let rejected = LearningRecord::for_suggestion(&s, "alice", UserAction::Rejected, early);
        let accepted = LearningRecord::for_suggestion(&s, "alice", UserAction::Accepted, cutoff);
        assert!(is_record_honored(&rejected, Some(cutoff)));
        assert!(!is_record_honored(&accepted, None));
    }

    #[test]
    fn test_superseded_generations() {
        let mut suggestions = vec![
            suggestion(1, "ner", 0, 5, "PER"),
            suggestion(2, "ner", 0, 5, "PER"),
        ];
        suggestions[1].generation_id = 2;
        let mut other = suggestion(3, "ner", 0, 5, "PER");
        other.recommender_id = "other".into();
        suggestions.push(other);

        hide_superseded(&mut suggestions);
        assert!(suggestions[0].visibility.contains(VisibilityFlags::SUPERSEDED));
        assert!(suggestions[1].is_visible());
        assert!(suggestions[2].is_visible());
    }
}
